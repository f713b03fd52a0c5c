//! SAS derivation inputs and encodings
//!
//! Six bytes of HKDF output are rendered either as three four-digit numbers
//! or as seven emoji from a fixed 64-entry table. The info string binding the
//! bytes to both parties is part of the wire contract and differs between the
//! two key agreement protocols.

use keyward_core::{DeviceId, TransactionId, UserId};

use super::parameters::{KeyAgreement, SasMethod};

/// Number of SAS bytes derived from the shared secret
pub const SAS_BYTES: usize = 6;

/// One party's view in the SAS info string
#[derive(Debug, Clone, Copy)]
pub struct SasParty<'a> {
    /// User
    pub user_id: &'a UserId,
    /// Device
    pub device_id: &'a DeviceId,
    /// Unpadded base64 ephemeral public key
    pub public_key: &'a str,
}

/// HKDF info for the SAS bytes.
///
/// `starter` is the party that sent `start`, regardless of who computes it.
pub fn sas_info(
    key_agreement: KeyAgreement,
    starter: SasParty<'_>,
    acceptor: SasParty<'_>,
    transaction_id: &TransactionId,
) -> String {
    match key_agreement {
        KeyAgreement::Curve25519HkdfSha256 => format!(
            "MATRIX_KEY_VERIFICATION_SAS|{}|{}|{}|{}|{}|{}|{}",
            starter.user_id,
            starter.device_id,
            starter.public_key,
            acceptor.user_id,
            acceptor.device_id,
            acceptor.public_key,
            transaction_id
        ),
        KeyAgreement::Curve25519 => format!(
            "MATRIX_KEY_VERIFICATION_SAS{}{}{}{}{}",
            starter.user_id,
            starter.device_id,
            acceptor.user_id,
            acceptor.device_id,
            transaction_id
        ),
    }
}

/// Three numbers in 1000..=9191 from the first five bytes
pub fn decimals(bytes: &[u8; SAS_BYTES]) -> (u16, u16, u16) {
    let b: [u16; 5] = [
        bytes[0].into(),
        bytes[1].into(),
        bytes[2].into(),
        bytes[3].into(),
        bytes[4].into(),
    ];
    let first = (b[0] << 5 | b[1] >> 3) + 1000;
    let second = ((b[1] & 0x7) << 10 | b[2] << 2 | b[3] >> 6) + 1000;
    let third = ((b[3] & 0x3f) << 7 | b[4] >> 1) + 1000;
    (first, second, third)
}

/// Seven table indices from the first 42 bits
pub fn emoji_indices(bytes: &[u8; SAS_BYTES]) -> [u8; 7] {
    let number = bytes
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
    let mut indices = [0u8; 7];
    for (i, index) in indices.iter_mut().enumerate() {
        *index = ((number >> (42 - 6 * i)) & 0x3f) as u8;
    }
    indices
}

/// A table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Emoji {
    /// The emoji itself
    pub symbol: &'static str,
    /// English description shown next to it
    pub description: &'static str,
}

const fn emoji(symbol: &'static str, description: &'static str) -> Emoji {
    Emoji {
        symbol,
        description,
    }
}

/// The SAS emoji table, indexed by 6-bit value
pub const EMOJI_TABLE: [Emoji; 64] = [
    emoji("🐶", "Dog"),
    emoji("🐱", "Cat"),
    emoji("🦁", "Lion"),
    emoji("🐎", "Horse"),
    emoji("🦄", "Unicorn"),
    emoji("🐷", "Pig"),
    emoji("🐘", "Elephant"),
    emoji("🐰", "Rabbit"),
    emoji("🐼", "Panda"),
    emoji("🐓", "Rooster"),
    emoji("🐧", "Penguin"),
    emoji("🐢", "Turtle"),
    emoji("🐟", "Fish"),
    emoji("🐙", "Octopus"),
    emoji("🦋", "Butterfly"),
    emoji("🌷", "Flower"),
    emoji("🌳", "Tree"),
    emoji("🌵", "Cactus"),
    emoji("🍄", "Mushroom"),
    emoji("🌏", "Globe"),
    emoji("🌙", "Moon"),
    emoji("☁️", "Cloud"),
    emoji("🔥", "Fire"),
    emoji("🍌", "Banana"),
    emoji("🍎", "Apple"),
    emoji("🍓", "Strawberry"),
    emoji("🌽", "Corn"),
    emoji("🍕", "Pizza"),
    emoji("🎂", "Cake"),
    emoji("❤️", "Heart"),
    emoji("😀", "Smiley"),
    emoji("🤖", "Robot"),
    emoji("🎩", "Hat"),
    emoji("👓", "Glasses"),
    emoji("🔧", "Spanner"),
    emoji("🎅", "Santa"),
    emoji("👍", "Thumbs Up"),
    emoji("☂️", "Umbrella"),
    emoji("⌛", "Hourglass"),
    emoji("⏰", "Clock"),
    emoji("🎁", "Gift"),
    emoji("💡", "Light Bulb"),
    emoji("📕", "Book"),
    emoji("✏️", "Pencil"),
    emoji("📎", "Paperclip"),
    emoji("✂️", "Scissors"),
    emoji("🔒", "Lock"),
    emoji("🔑", "Key"),
    emoji("🔨", "Hammer"),
    emoji("☎️", "Telephone"),
    emoji("🏁", "Flag"),
    emoji("🚂", "Train"),
    emoji("🚲", "Bicycle"),
    emoji("✈️", "Aeroplane"),
    emoji("🚀", "Rocket"),
    emoji("🏆", "Trophy"),
    emoji("⚽", "Ball"),
    emoji("🎸", "Guitar"),
    emoji("🎺", "Trumpet"),
    emoji("🔔", "Bell"),
    emoji("⚓", "Anchor"),
    emoji("🎧", "Headphones"),
    emoji("📁", "Folder"),
    emoji("📌", "Pin"),
];

/// The SAS rendered in every negotiated encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasDisplay {
    /// Decimal form, always present
    pub decimals: (u16, u16, u16),
    /// Emoji form, if negotiated
    pub emojis: Option<[Emoji; 7]>,
}

impl SasDisplay {
    /// Render `bytes` in the negotiated encodings
    pub fn new(bytes: &[u8; SAS_BYTES], methods: &[SasMethod]) -> Self {
        let emojis = methods
            .contains(&SasMethod::Emoji)
            .then(|| emoji_indices(bytes).map(|i| EMOJI_TABLE[usize::from(i)]));
        Self {
            decimals: decimals(bytes),
            emojis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimals_cover_full_range() {
        assert_eq!(decimals(&[0; 6]), (1000, 1000, 1000));
        assert_eq!(decimals(&[0xff; 6]), (9191, 9191, 9191));
    }

    #[test]
    fn decimals_split_bits() {
        // 0b00000001 0b00001000 -> first = (1 << 5 | 1) + 1000
        assert_eq!(decimals(&[0x01, 0x08, 0, 0, 0, 0]).0, 1033);
        // low three bits of byte 1 start the second number
        assert_eq!(decimals(&[0, 0x01, 0, 0, 0, 0]), (1000, 2024, 1000));
        // low bit of byte 4 is discarded
        assert_eq!(decimals(&[0, 0, 0, 0, 0x01, 0]), (1000, 1000, 1000));
    }

    #[test]
    fn emoji_indices_use_first_42_bits() {
        assert_eq!(emoji_indices(&[0; 6]), [0; 7]);
        assert_eq!(emoji_indices(&[0xff; 6]), [63; 7]);
        // 0b000001_000010_000011_... packs indices 1, 2, 3
        assert_eq!(
            emoji_indices(&[0b0000_0100, 0b0010_0000, 0b1100_0000, 0, 0, 0])[..3],
            [1, 2, 3]
        );
        // last six bits of byte 5 are unused
        assert_eq!(emoji_indices(&[0, 0, 0, 0, 0, 0x3f]), [0; 7]);
    }

    #[test]
    fn emoji_table_ends() {
        assert_eq!(EMOJI_TABLE[0].description, "Dog");
        assert_eq!(EMOJI_TABLE[63].description, "Pin");
        assert_eq!(EMOJI_TABLE[36].description, "Thumbs Up");
    }

    #[test]
    fn info_strings_follow_wire_format() {
        let alice = UserId::new("@alice:example.org");
        let bob = UserId::new("@bob:example.org");
        let alice_device = DeviceId::new("ALICE");
        let bob_device = DeviceId::new("BOB");
        let txn = TransactionId::new("txn");
        let starter = SasParty {
            user_id: &alice,
            device_id: &alice_device,
            public_key: "AKEY",
        };
        let acceptor = SasParty {
            user_id: &bob,
            device_id: &bob_device,
            public_key: "BKEY",
        };

        assert_eq!(
            sas_info(KeyAgreement::Curve25519HkdfSha256, starter, acceptor, &txn),
            "MATRIX_KEY_VERIFICATION_SAS|@alice:example.org|ALICE|AKEY|@bob:example.org|BOB|BKEY|txn"
        );
        assert_eq!(
            sas_info(KeyAgreement::Curve25519, starter, acceptor, &txn),
            "MATRIX_KEY_VERIFICATION_SAS@alice:example.orgALICE@bob:example.orgBOBtxn"
        );
    }

    #[test]
    fn display_includes_emoji_only_when_negotiated() {
        let bytes = [1, 2, 3, 4, 5, 6];
        assert!(SasDisplay::new(&bytes, &[SasMethod::Decimal]).emojis.is_none());
        let both = SasDisplay::new(&bytes, &[SasMethod::Decimal, SasMethod::Emoji]);
        assert_eq!(both.emojis.map(|e| e.len()), Some(7));
    }
}
