//! Named ringtones shipped under `<base url>/sounds/`.

/// File name and display label of every bundled sound
pub const SOUNDS: &[(&str, &str)] = &[
    ("iphone.mp3", "Iphone"),
    ("iphone6.mp3", "Iphone 6"),
    ("landline1.wav", "Landline 1"),
    ("landline2.wav", "Landline 2"),
    ("marimba.wav", "Marimba 1"),
    ("marimba.mp3", "Marimba 2"),
    ("ring3.wav", "Ring 3"),
    ("ring4.wav", "Ring 4"),
    ("ring5.wav", "Ring 5"),
    ("bird2.mp3", "Bird"),
    ("sf-oiseau-24.mp3", "Bird 1"),
    ("oiseau2.mp3", "Bird 2"),
    ("sf_oiseau_seul_01.mp3", "Bird 3"),
    ("sf_oiseaux.mp3", "Bird 4"),
    ("sf_canari.mp3", "Canary"),
    ("lg_bubble.mp3", "Bubble"),
    ("huawei.mp3", "Huawei"),
    ("lg_peanut.mp3", "Peanut"),
    ("xylo.mp3", "Xylophone"),
];

pub fn contains(file: &str) -> bool {
    SOUNDS.iter().any(|(name, _)| *name == file)
}

pub fn label(file: &str) -> Option<&'static str> {
    SOUNDS
        .iter()
        .find(|(name, _)| *name == file)
        .map(|(_, label)| *label)
}
