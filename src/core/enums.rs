use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a clip or HTML block is anchored on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GravityType {
    TopLeft,
    Top,
    TopRight,
    Left,
    #[default]
    Center,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}

impl GravityType {
    /// Horizontal anchor as a fraction of the free space (0, 0.5 or 1)
    pub fn horizontal_factor(&self) -> f64 {
        match self {
            Self::TopLeft | Self::Left | Self::BottomLeft => 0.0,
            Self::Top | Self::Center | Self::Bottom => 0.5,
            Self::TopRight | Self::Right | Self::BottomRight => 1.0,
        }
    }

    /// Vertical anchor as a fraction of the free space (0, 0.5 or 1)
    pub fn vertical_factor(&self) -> f64 {
        match self {
            Self::TopLeft | Self::Top | Self::TopRight => 0.0,
            Self::Left | Self::Center | Self::Right => 0.5,
            Self::BottomLeft | Self::Bottom | Self::BottomRight => 1.0,
        }
    }
}

/// How a clip is sized onto the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScaleType {
    /// Fill the canvas, cropping the overflow
    Crop,
    /// Fit inside the canvas, keeping the aspect ratio
    #[default]
    Fit,
    /// Fill the canvas, ignoring the aspect ratio
    Stretch,
    /// Keep the source size
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChannelLayout {
    Mono,
    #[default]
    Stereo,
    Surround,
    Quad,
    FivePointOne,
    SevenPointOne,
}

impl ChannelLayout {
    /// Most common layout for a channel count
    pub fn from_channels(channels: u16) -> Self {
        match channels {
            1 => Self::Mono,
            3 => Self::Surround,
            4 => Self::Quad,
            6 => Self::FivePointOne,
            8 => Self::SevenPointOne,
            _ => Self::Stereo,
        }
    }

    pub fn channels(&self) -> u16 {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
            Self::Surround => 3,
            Self::Quad => 4,
            Self::FivePointOne => 6,
            Self::SevenPointOne => 8,
        }
    }

    /// Name understood by ffmpeg's `-channel_layout`
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            Self::Mono => "mono",
            Self::Stereo => "stereo",
            Self::Surround => "3.0",
            Self::Quad => "quad",
            Self::FivePointOne => "5.1",
            Self::SevenPointOne => "7.1",
        }
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ffmpeg_name())
    }
}

/// How overlapping clip audio is combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VolumeMixType {
    /// Plain sum
    #[default]
    None,
    /// Divide by the number of overlapping clips
    Average,
    /// Scale each overlapping clip down to 77%
    Reduce,
}
