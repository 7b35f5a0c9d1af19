mod capture;
mod dynamic_temperature;
mod locally_typical;
mod min_p;
mod mirostat;
mod normalize;
mod quadratic;
mod rand_distrib;
mod repetition;
mod tail_free;
mod temperature;
mod top_a;
mod top_k;
mod top_p;

pub use self::{
    capture::*, dynamic_temperature::*, locally_typical::*, min_p::*, mirostat::*, normalize::*,
    quadratic::*, rand_distrib::*, repetition::*, tail_free::*, temperature::*, top_a::*,
    top_k::*, top_p::*,
};
