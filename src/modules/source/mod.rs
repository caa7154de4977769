//! Source modules (no inputs)

mod clip_player;
mod poly_sine;
mod sine;

pub use clip_player::ClipPlayer;
pub use poly_sine::PolySine;
pub use sine::Sine;
