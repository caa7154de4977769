//! Effect modules (inputs and outputs)

mod feedback_delay;
mod gain;
mod mixer;
mod slew_limiter;

pub use feedback_delay::FeedbackDelay;
pub use gain::Gain;
pub use mixer::Mixer;
pub use slew_limiter::SlewLimiter;
