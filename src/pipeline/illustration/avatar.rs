use std::fmt;

use crate::pipeline::surface::Rgba;

/// Characters shipped with the application.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AvatarKind {
    Girl,
    #[default]
    Glasses,
    Boy,
    Abstract,
    Blathers,
    TomNook,
}

impl AvatarKind {
    pub const ALL: [AvatarKind; 6] = [
        AvatarKind::Girl,
        AvatarKind::Glasses,
        AvatarKind::Boy,
        AvatarKind::Abstract,
        AvatarKind::Blathers,
        AvatarKind::TomNook,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AvatarKind::Girl => "girl",
            AvatarKind::Glasses => "glasses",
            AvatarKind::Boy => "boy",
            AvatarKind::Abstract => "abstract",
            AvatarKind::Blathers => "blathers",
            AvatarKind::TomNook => "tom-nook",
        }
    }

    pub fn from_name(name: &str) -> Option<AvatarKind> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.label().eq_ignore_ascii_case(name))
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|kind| kind.label()).collect()
    }
}

impl fmt::Display for AvatarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ears {
    None,
    Round,
    Pointed,
}

/// Palette and proportions of one character. Lengths are in capture pixels
/// for a 300 pixel wide frame and scale with the frame.
#[derive(Clone, Debug, PartialEq)]
pub struct AvatarAsset {
    pub kind: AvatarKind,
    pub skin: Rgba,
    pub outline: Rgba,
    pub shirt: Rgba,
    pub pants: Rgba,
    pub hair: Option<Rgba>,
    pub eye: Rgba,
    pub mouth: Rgba,
    pub ears: Ears,
    pub glasses: Option<Rgba>,
    pub arm_width: f32,
    pub leg_width: f32,
    pub outline_width: f32,
}

impl AvatarAsset {
    pub fn for_kind(kind: AvatarKind) -> Self {
        let base = Self {
            kind,
            skin: [255, 214, 186, 255],
            outline: [40, 40, 52, 255],
            shirt: [80, 140, 220, 255],
            pants: [60, 70, 90, 255],
            hair: Some([70, 45, 30, 255]),
            eye: [30, 30, 30, 255],
            mouth: [190, 70, 80, 255],
            ears: Ears::None,
            glasses: None,
            arm_width: 10.0,
            leg_width: 13.0,
            outline_width: 2.0,
        };

        match kind {
            AvatarKind::Girl => Self {
                shirt: [236, 112, 150, 255],
                pants: [90, 70, 140, 255],
                hair: Some([120, 60, 30, 255]),
                arm_width: 8.0,
                leg_width: 11.0,
                ..base
            },
            AvatarKind::Glasses => Self {
                shirt: [250, 196, 70, 255],
                glasses: Some([20, 20, 24, 255]),
                hair: Some([30, 30, 36, 255]),
                ..base
            },
            AvatarKind::Boy => Self {
                shirt: [70, 170, 110, 255],
                pants: [50, 80, 140, 255],
                ..base
            },
            AvatarKind::Abstract => Self {
                skin: [120, 200, 240, 255],
                outline: [20, 60, 120, 255],
                shirt: [245, 120, 70, 255],
                pants: [120, 80, 200, 255],
                hair: None,
                mouth: [20, 60, 120, 255],
                arm_width: 14.0,
                leg_width: 16.0,
                outline_width: 0.0,
                ..base
            },
            AvatarKind::Blathers => Self {
                skin: [150, 110, 70, 255],
                outline: [70, 45, 25, 255],
                shirt: [120, 90, 150, 255],
                pants: [110, 80, 50, 255],
                hair: None,
                eye: [250, 240, 200, 255],
                mouth: [240, 190, 60, 255],
                ears: Ears::Pointed,
                glasses: Some([80, 60, 40, 255]),
                ..base
            },
            AvatarKind::TomNook => Self {
                skin: [170, 120, 80, 255],
                outline: [60, 40, 25, 255],
                shirt: [110, 170, 130, 255],
                pants: [90, 120, 100, 255],
                hair: None,
                mouth: [60, 40, 25, 255],
                ears: Ears::Round,
                ..base
            },
        }
    }
}
