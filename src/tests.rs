use anyhow::Result;

use crate::{
    diagnostics::{read_jsonl, survivor_histogram},
    prelude::*,
};

/// Raw scores used by most tests. Softmax gives roughly
/// `[0.636, 0.234, 0.086, 0.032, 0.012]`.
pub const T1: &[f32] = &[2.0, 1.0, 0.0, -1.0, -2.0];
pub const T2: &[f32] = &[0.1, 0.2, 0.3, 0.4];

pub type TestValidator = fn(&Logits, &[usize]);

fn run_sampler(sampler: &mut impl Sampler, input: &[f32]) -> Logits {
    let mut logits = Logits::try_from_iter(input.iter().copied()).expect("Bad logits");
    sampler.sample(&mut (), &mut logits).expect("Sampler error");
    logits
}

fn test_sampler(sampler: &mut impl Sampler, input: &[f32], expected: &[usize], vf: TestValidator) {
    vf(&run_sampler(sampler, input), expected)
}

fn test_sampler_ln(
    sampler: &mut impl Sampler,
    input: &[f32],
    expected: &[usize],
    vf: TestValidator,
) {
    let input = input.iter().map(|p| p.ln()).collect::<Vec<_>>();
    test_sampler(sampler, &input, expected, vf)
}

fn survivors(logits: &Logits) -> Vec<usize> {
    logits
        .iter()
        .enumerate()
        .filter(|(_, l)| l.is_finite())
        .map(|(idx, _)| idx)
        .collect()
}

fn validate(logits: &Logits, expected: &[usize]) {
    assert_eq!(survivors(logits), expected, "logits: {logits:?}");
}

/// Applying the filter a second time must not change the survivors. This
/// holds for the inputs used here, not for every input: renormalizing after
/// a cut raises the top probability, which can tighten the next cut.
fn validate_idempotent(sampler: &mut impl Sampler, input: &[f32], expected: &[usize]) {
    let mut logits = run_sampler(sampler, input);
    validate(&logits, expected);
    sampler.sample(&mut (), &mut logits).expect("Sampler error");
    validate(&logits, expected);
}

fn assert_close(got: &[f32], expected: &[f32]) {
    assert_eq!(got.len(), expected.len());
    assert!(
        got.iter()
            .zip(expected)
            .all(|(g, e)| (g - e).abs() < 1e-5 || g == e),
        "got {got:?}, expected {expected:?}"
    );
}

fn config(s: &str) -> DecodingConfig {
    let mut cfg = DecodingConfig::default();
    cfg.configure(s).expect("Bad config string");
    cfg
}

fn sampler_error(err: &anyhow::Error) -> &SamplerError {
    err.downcast_ref::<SamplerError>()
        .expect("Not a SamplerError")
}

#[test]
fn test_temperature() -> Result<()> {
    let mut logits = Logits::try_from_iter([0.3f32, -1.0, 2.0, 0.5, f32::NEG_INFINITY])?;
    let order = logits.sorted_indices()?;
    SampleTemperature::new(0.5)?.sample(&mut (), &mut logits)?;
    assert_eq!(&logits[..4], &[0.6f32, -2.0, 4.0, 1.0]);
    assert_eq!(logits[4], f32::NEG_INFINITY);
    assert_eq!(logits.sorted_indices()?, order);

    assert!(matches!(
        SampleTemperature::new(0.0),
        Err(SamplerError::InvalidConfiguration(_))
    ));
    assert!(SampleTemperature::new(-1.0).is_err());
    Ok(())
}

#[test]
fn test_min_p() -> Result<()> {
    let probs = Logits::try_from_iter(T1.iter().copied())?.softmax();
    assert!((probs[0] - 0.6364).abs() < 1e-3);

    validate_idempotent(&mut SampleMinP::new(0.5, 1)?, T1, &[0]);
    validate_idempotent(&mut SampleMinP::new(0.1, 1)?, T1, &[0, 1, 2]);
    test_sampler(&mut SampleMinP::new(0.5, 3)?, T1, &[0, 1, 2], validate);
    test_sampler(&mut SampleMinP::new(0.0, 1)?, T1, &[0, 1, 2, 3, 4], validate);
    Ok(())
}

#[test]
fn test_top_a() -> Result<()> {
    validate_idempotent(&mut SampleTopA::new(0.5, 1)?, T1, &[0, 1]);
    test_sampler(&mut SampleTopA::new(1.0, 1)?, T1, &[0], validate);
    test_sampler(&mut SampleTopA::new(1.0, 2)?, T1, &[0, 1], validate);
    Ok(())
}

#[test]
fn test_top_a_second_pass_tightens() -> Result<()> {
    // First pass: threshold 0.25 keeps 0.5 and 0.3. Second pass: the
    // survivors renormalize to 0.625 and 0.375, threshold ~0.39.
    let mut sampler = SampleTopA::new(1.0, 1)?;
    let input = [0.5f32, 0.3, 0.2].map(f32::ln);
    let mut logits = run_sampler(&mut sampler, &input);
    validate(&logits, &[0, 1]);
    sampler.sample(&mut (), &mut logits)?;
    validate(&logits, &[0]);
    Ok(())
}

#[test]
fn test_tail_free() -> Result<()> {
    const T: &[f32] = &[3.0, 2.5, 0.0, -0.5, -4.0, -5.0];

    validate_idempotent(&mut SampleTailFree::new(0.5, 1)?, T1, &[0]);
    validate_idempotent(&mut SampleTailFree::new(0.9, 1)?, T1, &[0, 1]);
    validate_idempotent(&mut SampleTailFree::new(0.6, 1)?, T, &[0, 1]);
    test_sampler(&mut SampleTailFree::new(0.5, 3)?, T1, &[0, 1, 2], validate);
    test_sampler(&mut SampleTailFree::new(1.0, 1)?, T1, &[0, 1, 2, 3, 4], validate);
    // Too short for a second derivative.
    test_sampler(&mut SampleTailFree::new(0.1, 1)?, &[1.0], &[0], validate);
    Ok(())
}

#[test]
fn test_top_k() {
    test_sampler(&mut SampleTopK::new(1, 1), T2, &[3], validate);
    test_sampler(&mut SampleTopK::new(3, 1), T2, &[1, 2, 3], validate);
    test_sampler(&mut SampleTopK::new(1, 2), T2, &[2, 3], validate);
    test_sampler(&mut SampleTopK::new(0, 1), T2, &[0, 1, 2, 3], validate);
}

#[test]
fn test_top_p() -> Result<()> {
    test_sampler_ln(&mut SampleTopP::new(0.0, 1)?, T2, &[3], validate);
    test_sampler_ln(&mut SampleTopP::new(0.6, 1)?, T2, &[2, 3], validate);
    test_sampler_ln(&mut SampleTopP::new(1.0, 1)?, T2, &[0, 1, 2, 3], validate);
    assert!(SampleTopP::new(1.5, 1).is_err());
    Ok(())
}

#[test]
fn test_typical() -> Result<()> {
    test_sampler_ln(
        &mut SampleLocallyTypical::new(0.5, 1)?,
        &[0.97, 0.01, 0.01, 0.01],
        &[0],
        validate,
    );
    test_sampler_ln(
        &mut SampleLocallyTypical::new(0.5, 1)?,
        &[0.4, 0.2, 0.2, 0.2],
        &[1, 2, 3],
        validate,
    );
    Ok(())
}

#[test]
fn test_repetition() -> Result<()> {
    const T: &[f32] = &[1.0, -1.0, 2.0, 0.5];

    let mut sampler = SampleRepetition::new(2.0, 0.5, 0.1, 0)?;
    let mut res = SequenceResources::seeded(0, vec![0, 0, 0, 1, 3]);
    let mut logits = Logits::try_from_iter(T.iter().copied())?;
    sampler.sample(&mut res, &mut logits)?;
    // Token 0: 1 / 2 - (0.5 + 3 * 0.1). Token 1: -1 * 2 - (0.5 + 0.1).
    assert_close(&logits, &[-0.3, -2.6, 2.0, -0.35]);

    // Only the last two tokens count.
    let mut sampler = SampleRepetition::new(2.0, 0.5, 0.1, 2)?;
    let mut logits = Logits::try_from_iter(T.iter().copied())?;
    sampler.sample(&mut res, &mut logits)?;
    assert_close(&logits, &[1.0, -2.6, 2.0, -0.35]);
    Ok(())
}

#[test]
fn test_repetition_inactive() -> Result<()> {
    let mut sampler = SampleRepetition::new(1.0, 0.0, 0.0, 0)?;
    assert!(!sampler.is_active());
    let mut res = SequenceResources::seeded(0, vec![]);
    let mut logits = Logits::try_from_iter(T1.iter().copied())?;
    sampler.sample(&mut res, &mut logits)?;
    assert_eq!(&logits[..], T1);

    assert!(matches!(
        SampleRepetition::new(0.0, 0.0, 0.0, 0),
        Err(SamplerError::InvalidConfiguration(_))
    ));
    Ok(())
}

#[test]
fn test_repetition_invalid_token() -> Result<()> {
    let mut sampler = SampleRepetition::new(1.2, 0.0, 0.0, 0)?;
    let mut res = SequenceResources::seeded(0, vec![1, 9]);
    let mut logits = Logits::try_from_iter(T2.iter().copied())?;
    let err = sampler
        .sample(&mut res, &mut logits)
        .expect_err("Token 9 is out of range");
    assert!(matches!(
        sampler_error(&err),
        SamplerError::InvalidToken {
            token_id: 9,
            n_vocab: 4
        }
    ));
    Ok(())
}

#[test]
fn test_chain() -> Result<()> {
    let mut sc: SamplerChain = SamplerChain::new();
    sc += SampleTemperature::new(0.5)?;
    sc.push_boxed(SampleMinP::new(0.5, 1)?);
    let mut sc = sc + SampleRandDistrib::new();
    assert_eq!(sc.len(), 3);

    let mut res = SequenceResources::seeded(123, vec![]);
    let mut logits = Logits::try_from_iter(T1.iter().copied())?;
    assert_eq!(logits.sample_token(&mut res, &mut sc)?, Some(0));
    Ok(())
}

#[test]
fn test_assembly_selection_and_order() -> Result<()> {
    let base = "tfs=0.9:top_a=0.2:min_p=0.1:dynamic_temperature=true:\
                dynatemp_low=0.5:dynatemp_high=1.5:smoothing_factor=0.3:\
                repetition_penalty=1.1";

    let pipeline = Pipeline::new(&config(base))?;
    assert_eq!(
        pipeline.stage_kinds(),
        vec![
            StageKind::Repetition,
            StageKind::Temperature,
            StageKind::DynamicTemperature,
            StageKind::QuadraticSampling,
            StageKind::TailFree,
            StageKind::TopA,
            StageKind::MinP,
        ]
    );

    let pipeline = Pipeline::new(&config(&format!("{base}:temperature_last=true")))?;
    assert_eq!(
        pipeline.stage_kinds(),
        vec![
            StageKind::Repetition,
            StageKind::TailFree,
            StageKind::TopA,
            StageKind::MinP,
            StageKind::Temperature,
            StageKind::DynamicTemperature,
            StageKind::QuadraticSampling,
        ]
    );

    // Identity parameters select nothing but temperature.
    let pipeline = Pipeline::new(&DecodingConfig::default())?;
    assert_eq!(pipeline.stage_kinds(), vec![StageKind::Temperature]);
    assert_eq!(pipeline.mirostat_state(), None);
    Ok(())
}

#[test]
fn test_assembly_partial_priority() -> Result<()> {
    // Selected stages missing from the list go last, in insertion order.
    // Unknown names are skipped.
    let pipeline = Pipeline::new(&config(
        "tfs=0.9:top_k=5:min_p=0.1:sampler_priority=nonsense,min_p,temperature",
    ))?;
    assert_eq!(
        pipeline.stage_kinds(),
        vec![
            StageKind::MinP,
            StageKind::Temperature,
            StageKind::TopK,
            StageKind::TailFree,
        ]
    );
    Ok(())
}

#[test]
fn test_assembly_rejects_bad_config() {
    for s in ["temperature=0", "mirostat_mode=1", "min_p=2"] {
        assert!(
            matches!(
                Pipeline::new(&config(s)),
                Err(SamplerError::InvalidConfiguration(_))
            ),
            "{s} should be rejected"
        );
    }
}

#[test]
fn test_min_keep_floor() -> Result<()> {
    for s in [
        "min_p=0.99",
        "tfs=0.01",
        "top_a=1",
        "top_k=1",
        "top_p=0.01",
        "typical_p=0.01",
        "min_p=0.9:tfs=0.1:top_a=1:top_k=1:top_p=0.01:temperature=0.5",
    ] {
        let mut pipeline = Pipeline::new(&config(&format!("{s}:min_tokens_to_keep=3")))?;
        let mut res = SequenceResources::seeded(0, vec![]);
        let mut logits = Logits::try_from_iter(T1.iter().copied())?;
        pipeline.apply(&mut res, &mut logits)?;
        assert!(logits.finite_count() >= 3, "{s}: {logits:?}");
    }
    Ok(())
}

#[test]
fn test_renormalize() -> Result<()> {
    let mut pipeline = Pipeline::new(&config("min_p=0.1:renormalize_logits=true"))?;
    assert_eq!(
        pipeline.stage_kinds().last(),
        Some(&StageKind::Normalize)
    );
    let mut logits = Logits::try_from_iter(T1.iter().copied())?;
    logits.sample(&mut (), &mut pipeline)?;
    let total = logits
        .iter()
        .filter(|l| l.is_finite())
        .map(|l| l.exp())
        .sum::<f32>();
    assert!((total - 1.0).abs() < 1e-5);
    Ok(())
}

#[test]
fn test_mirostat_pipeline() -> Result<()> {
    let cfg = config("mirostat_mode=2:mirostat_tau=5:mirostat_eta=0.1");
    let mut pipeline = Pipeline::new(&cfg)?;
    assert_eq!(
        pipeline.stage_kinds(),
        vec![StageKind::Temperature, StageKind::Mirostat]
    );
    assert_eq!(pipeline.mirostat_state(), Some((10.0, 0.0)));

    let mut res = SequenceResources::seeded(5, vec![]);
    let mut logits = Logits::try_from_iter([0.0f32, 0.0])?;
    let token = pipeline
        .sample_token(&mut res, &mut logits)?
        .expect("No token");
    assert!(token < 2);
    let (mu, error) = pipeline.mirostat_state().expect("No mirostat");
    assert!((mu - 10.4).abs() < 1e-5);
    assert!((error + 4.0).abs() < 1e-5);
    Ok(())
}

#[test]
fn test_mirostat_trajectory() -> Result<()> {
    let cfg = config("mirostat_mode=2:mirostat_tau=3:mirostat_eta=0.2");
    let run = || -> Result<Vec<(f32, f32)>> {
        let mut pipeline = Pipeline::new(&cfg)?;
        let mut res = SequenceResources::seeded(99, vec![]);
        let mut states = vec![pipeline.mirostat_state().expect("No mirostat")];
        for _ in 0..8 {
            let mut logits = Logits::try_from_iter(T1.iter().copied())?;
            let token = pipeline.sample_token(&mut res, &mut logits)?;
            res.push_token(token.expect("No token"));
            states.push(pipeline.mirostat_state().expect("No mirostat"));
        }
        Ok(states)
    };

    let states = run()?;
    assert_eq!(states, run()?);
    states.windows(2).for_each(|w| {
        let ((mu0, _), (mu1, error)) = (w[0], w[1]);
        assert!((mu1 - (mu0 - 0.2 * error)).abs() < 1e-5);
    });
    Ok(())
}

#[test]
fn test_batch_mirostat_is_per_sequence() -> Result<()> {
    let cfg = config("mirostat_mode=2");
    let mut batch = BatchPipeline::new(&cfg, 2)?;
    assert_eq!(batch.len(), 2);

    let mut res = vec![
        SequenceResources::seeded(1, vec![]),
        SequenceResources::seeded(2, vec![]),
    ];
    // Sequence 0 has two equally likely tokens (1 bit of surprise), sequence
    // 1 a single candidate (no surprise).
    let mut logits = vec![
        Logits::try_from_iter([0.0f32, 0.0])?,
        Logits::try_from_iter([3.0f32, f32::NEG_INFINITY])?,
    ];
    let tokens = batch.sample_tokens(&mut res, &mut logits)?;
    assert_eq!(tokens[1], Some(0));

    let (mu0, err0) = batch.pipeline(0).and_then(Pipeline::mirostat_state).expect("No state");
    let (mu1, err1) = batch.pipeline(1).and_then(Pipeline::mirostat_state).expect("No state");
    assert!((mu0 - 10.4).abs() < 1e-5 && (err0 + 4.0).abs() < 1e-5);
    assert!((mu1 - 10.5).abs() < 1e-5 && (err1 + 5.0).abs() < 1e-5);
    Ok(())
}

#[test]
fn test_batch_shape_checks() -> Result<()> {
    let mut batch = BatchPipeline::new(&DecodingConfig::default(), 2)?;
    let mut res = vec![SequenceResources::seeded(1, vec![])];
    let mut logits = vec![
        Logits::try_from_iter(T1.iter().copied())?,
        Logits::try_from_iter(T1.iter().copied())?,
    ];
    let err = batch.apply(&mut res, &mut logits).expect_err("Short batch");
    assert!(matches!(
        sampler_error(&err),
        SamplerError::BatchMismatch {
            expected: 2,
            got: 1
        }
    ));

    res.push(SequenceResources::seeded(2, vec![]));
    logits[1] = Logits::try_from_iter(T2.iter().copied())?;
    let err = batch.apply(&mut res, &mut logits).expect_err("Ragged batch");
    assert!(matches!(
        sampler_error(&err),
        SamplerError::LogitsError(LogitsError::VocabMismatch {
            expected: 5,
            got: 4
        })
    ));
    Ok(())
}

#[test]
fn test_vocab_is_fixed_across_steps() -> Result<()> {
    let mut pipeline = Pipeline::new(&DecodingConfig::default())?;
    pipeline.apply(&mut (), &mut Logits::try_from_iter(T2.iter().copied())?)?;
    let err = pipeline
        .apply(&mut (), &mut Logits::try_from_iter(T1.iter().copied())?)
        .expect_err("Vocabulary changed");
    assert!(matches!(
        sampler_error(&err),
        SamplerError::LogitsError(LogitsError::VocabMismatch {
            expected: 4,
            got: 5
        })
    ));
    Ok(())
}

#[test]
fn test_numeric_degeneracy() -> Result<()> {
    let mut pipeline = Pipeline::new(&config("min_p=0.5"))?;
    let mut logits = Logits::try_from_iter([f32::NEG_INFINITY; 3])?;
    let err = pipeline
        .apply(&mut (), &mut logits)
        .expect_err("Nothing to sample");
    assert!(matches!(
        sampler_error(&err),
        SamplerError::NumericDegeneracy {
            sequence: 0,
            step: 0
        }
    ));
    assert_eq!(pipeline.step(), 1);
    Ok(())
}

#[test]
fn test_overflow_is_reported() -> Result<()> {
    // Valid, but finite scores divide to +inf.
    let mut pipeline = Pipeline::new(&config("temperature=1e-38"))?;
    let mut logits = Logits::try_from_iter([10.0f32, 5.0, 0.0])?;
    let err = pipeline
        .apply(&mut (), &mut logits)
        .expect_err("Overflowed scores");
    assert!(matches!(
        sampler_error(&err),
        SamplerError::LogitsError(LogitsError::InvalidLogit(0))
    ));
    assert_eq!(logits.first_invalid(), Some(0));
    Ok(())
}

#[test]
fn test_quadratic_masks_far_entries() -> Result<()> {
    let mut pipeline = Pipeline::new(&config("smoothing_factor=0.5"))?;
    let mut res = SequenceResources::seeded(3, vec![]);
    let mut logits = Logits::try_from_iter([2.0f32, 1.0, f32::MIN])?;
    let token = pipeline.sample_token(&mut res, &mut logits)?;
    assert_eq!(&logits[..], &[2.0, 1.5, f32::NEG_INFINITY]);
    assert!(matches!(token, Some(0 | 1)));
    Ok(())
}

#[test]
fn test_capture_is_last_and_read_only() -> Result<()> {
    let sink = DiagnosticSink::new();
    let cfg = config("min_p=0.1:renormalize_logits=true");
    let mut pipeline = Pipeline::with_diagnostics(&cfg, sink.clone(), 0, CaptureMode::Full)?;
    assert_eq!(
        pipeline.stage_kinds(),
        vec![
            StageKind::Temperature,
            StageKind::MinP,
            StageKind::Normalize,
            StageKind::Capture
        ]
    );

    match pipeline.stages().last() {
        Some(Stage::Capture(capture)) => {
            assert_eq!(capture.sequence(), pipeline.sequence());
            assert_eq!(capture.mode(), CaptureMode::Full);
        }
        other => panic!("Capture is not last: {other:?}"),
    }

    let mut logits = Logits::try_from_iter(T1.iter().copied())?;
    pipeline.apply(&mut (), &mut logits)?;
    let records = sink.records()?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].pre.as_ref().map(|s| &s.values[..]), Some(T1));
    assert_eq!(records[0].post.as_ref().map(|s| &s.values[..]), Some(&logits[..]));
    assert_eq!(records[0].survivors(), Some(3));
    assert_eq!(records[0].chosen, None);

    let mut res = SequenceResources::seeded(7, vec![]);
    let mut logits = Logits::try_from_iter(T1.iter().copied())?;
    let token = pipeline.sample_token(&mut res, &mut logits)?;
    let records = sink.records_for(0)?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].step, 1);
    assert_eq!(records[1].chosen, token);
    assert!(records[1].chosen_rank().map_or(false, |rank| rank < 3));
    Ok(())
}

#[test]
fn test_batch_diagnostics_dump() -> Result<()> {
    let sink = DiagnosticSink::new();
    let cfg = config("top_k=2");
    let mut batch = BatchPipeline::with_diagnostics(&cfg, 3, sink.clone(), CaptureMode::TopK(3))?;
    let mut res = (0..3)
        .map(|seed| SequenceResources::seeded(seed, vec![]))
        .collect::<Vec<_>>();
    for _ in 0..2 {
        let mut logits = vec![Logits::try_from_iter(T1.iter().copied())?; 3];
        batch
            .sample_tokens(&mut res, &mut logits)?
            .into_iter()
            .zip(res.iter_mut())
            .for_each(|(token, res)| res.push_token(token.expect("No token")));
    }

    assert_eq!(res[0].history().map(<[_]>::len), Some(2));
    res[0].with_last_tokens_mut(&mut |history| history.clear())?;
    assert_eq!(res[0].history(), Some(&[][..]));

    let mut buf = vec![];
    sink.write_jsonl(&mut buf)?;
    let records = read_jsonl(buf.as_slice())?;
    assert_eq!(records.len(), 6);
    assert_eq!(sink.records_for(2)?.len(), 2);
    assert!(records.iter().all(|r| r.chosen.map_or(false, |tid| tid < 2)));
    assert_eq!(survivor_histogram(&records).get(&2), Some(&6));
    Ok(())
}

#[test]
fn test_json_config_file() -> Result<()> {
    let path = std::env::temp_dir().join(format!(
        "llm-warpers-config-{}.json",
        std::process::id()
    ));
    std::fs::write(
        &path,
        r#"{
            "temperature": 0.7,
            "min_p": 0.05,
            "sampler_priority": ["min_p", "temperature"],
            "max_new_tokens": 200
        }"#,
    )?;
    let cfg = DecodingConfig::from_json_file(&path);
    std::fs::remove_file(&path)?;
    let cfg = cfg?;
    assert_eq!(cfg.temperature, 0.7);
    assert_eq!(
        cfg.priority(),
        vec![StageKind::MinP, StageKind::Temperature]
    );
    assert_eq!(
        Pipeline::new(&cfg)?.stage_kinds(),
        vec![StageKind::MinP, StageKind::Temperature]
    );
    Ok(())
}
