//! Value types shared by every reader, writer, effect and timeline

pub mod color;
pub mod enums;
pub mod fraction;
pub mod frame;
pub mod keyframe;

pub use color::Color;
pub use enums::{ChannelLayout, GravityType, ScaleType, VolumeMixType};
pub use fraction::Fraction;
pub use frame::Frame;
pub use keyframe::{Coordinate, HandleType, InterpolationType, Keyframe, Point};
