//! NRPN address database for the SQ mixer.
//!
//! Every mixer parameter lives at `base(control) + offset(from, to)`. Crosspoint
//! offsets are laid out as rows of 128 per destination bus with one column per
//! source channel; bus and FX-return masters (`from == to`) share a dedicated
//! block at offset 2424 that sits in columns no source channel uses.

use std::fmt;
use std::str::FromStr;

use crate::error::DeviceError;
use crate::midi::MAX_14BIT;

pub const INPUT_COUNT: u8 = 48;
pub const FX_RETURN_COUNT: u8 = 8;
pub const AUX_COUNT: u8 = 12;
pub const GROUP_COUNT: u8 = 12;
pub const FX_SEND_COUNT: u8 = 4;
pub const MATRIX_COUNT: u8 = 12;

const DEST_STRIDE: u16 = 128;
const SOURCE_STRIDE: u16 = 1;
const MASTER_BLOCK: u16 = 2424;

/// Parameter family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlType {
    Mute,
    Fader,
    Pan,
    Assign,
}

impl ControlType {
    pub const ALL: [ControlType; 4] = [
        ControlType::Mute,
        ControlType::Fader,
        ControlType::Pan,
        ControlType::Assign,
    ];

    pub fn base(self) -> u16 {
        match self {
            ControlType::Mute => 0x0000,
            ControlType::Fader => 0x2000,
            ControlType::Pan => 0x2800,
            ControlType::Assign => 0x3000,
        }
    }
}

/// Mixer channel class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelClass {
    Input,
    FxReturn,
    Main,
    Aux,
    Group,
    FxSend,
    Matrix,
}

impl ChannelClass {
    fn prefix(self) -> &'static str {
        match self {
            ChannelClass::Input => "IP",
            ChannelClass::FxReturn => "FXRTN",
            ChannelClass::Main => "LR",
            ChannelClass::Aux => "AUX",
            ChannelClass::Group => "GRP",
            ChannelClass::FxSend => "FXSND",
            ChannelClass::Matrix => "MTX",
        }
    }

    fn count(self) -> u8 {
        match self {
            ChannelClass::Input => INPUT_COUNT,
            ChannelClass::FxReturn => FX_RETURN_COUNT,
            ChannelClass::Main => 1,
            ChannelClass::Aux => AUX_COUNT,
            ChannelClass::Group => GROUP_COUNT,
            ChannelClass::FxSend => FX_SEND_COUNT,
            ChannelClass::Matrix => MATRIX_COUNT,
        }
    }
}

/// A resolved mixer channel: class plus 1-based number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelRef {
    pub class: ChannelClass,
    pub number: u8,
}

impl ChannelRef {
    pub fn new(class: ChannelClass, number: u8) -> Result<Self, DeviceError> {
        if number == 0 || number > class.count() {
            return Err(DeviceError::Address(format!(
                "{} channel number {} outside 1-{}",
                class.prefix(),
                number,
                class.count()
            )));
        }
        Ok(Self { class, number })
    }

    pub const LR: ChannelRef = ChannelRef {
        class: ChannelClass::Main,
        number: 1,
    };

    /// Every valid channel, in address order
    pub fn all() -> Vec<ChannelRef> {
        [
            ChannelClass::Input,
            ChannelClass::FxReturn,
            ChannelClass::Main,
            ChannelClass::Aux,
            ChannelClass::Group,
            ChannelClass::FxSend,
            ChannelClass::Matrix,
        ]
        .into_iter()
        .flat_map(|class| (1..=class.count()).map(move |number| ChannelRef { class, number }))
        .collect()
    }

    /// Column index when used as a crosspoint source
    fn source_index(self) -> Option<u16> {
        let n = self.number as u16;
        match self.class {
            ChannelClass::Input => Some(n - 1),
            ChannelClass::FxReturn => Some(INPUT_COUNT as u16 + n - 1),
            _ => None,
        }
    }

    /// Row index when used as a crosspoint destination
    fn dest_index(self) -> Option<u16> {
        let n = self.number as u16;
        match self.class {
            ChannelClass::Main => Some(0),
            ChannelClass::Aux => Some(n),
            ChannelClass::Group => Some(AUX_COUNT as u16 + n),
            ChannelClass::FxSend => Some((AUX_COUNT + GROUP_COUNT) as u16 + n),
            ChannelClass::Matrix => Some((AUX_COUNT + GROUP_COUNT + FX_SEND_COUNT) as u16 + n),
            _ => None,
        }
    }

    /// Offset inside the master block, for channels that have a master
    fn master_index(self) -> Option<u16> {
        let n = self.number as u16;
        match self.class {
            ChannelClass::Main => Some(0),
            ChannelClass::Aux => Some(79 + n),
            ChannelClass::Group => Some(91 + n),
            ChannelClass::FxSend => Some(103 + n),
            ChannelClass::FxReturn => Some(107 + n),
            ChannelClass::Matrix => Some(115 + n),
            ChannelClass::Input => None,
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class {
            ChannelClass::Main => write!(f, "LR"),
            class => write!(f, "{}{}", class.prefix(), self.number),
        }
    }
}

impl FromStr for ChannelRef {
    type Err = DeviceError;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        let upper = label.trim().to_uppercase();
        if upper == "LR" {
            return Ok(ChannelRef::LR);
        }

        // Longest prefixes first so "FXRTN" is not read as "FX..."
        let classes = [
            ChannelClass::FxReturn,
            ChannelClass::FxSend,
            ChannelClass::Input,
            ChannelClass::Aux,
            ChannelClass::Group,
            ChannelClass::Matrix,
        ];
        for class in classes {
            if let Some(digits) = upper.strip_prefix(class.prefix()) {
                let number = digits.parse::<u8>().map_err(|_| {
                    DeviceError::Address(format!("Unknown channel label '{}'", label))
                })?;
                return ChannelRef::new(class, number);
            }
        }

        Err(DeviceError::Address(format!(
            "Unknown channel label '{}' (expected IPn, FXRTNn, LR, AUXn, GRPn, FXSNDn or MTXn)",
            label
        )))
    }
}

/// Compute the 14-bit NRPN address of `control` for the `from -> to` pair
pub fn address(control: ControlType, from: ChannelRef, to: ChannelRef) -> Result<u16, DeviceError> {
    let offset = if from == to {
        from.master_index().map(|m| MASTER_BLOCK + m)
    } else {
        match (from.source_index(), to.dest_index()) {
            (Some(src), Some(dst)) => Some(dst * DEST_STRIDE + src * SOURCE_STRIDE),
            _ => None,
        }
    }
    .ok_or_else(|| {
        DeviceError::Address(format!("No {:?} parameter for {} -> {}", control, from, to))
    })?;

    let address = control.base() + offset;
    if address > MAX_14BIT {
        return Err(DeviceError::Address(format!(
            "{:?} address {} for {} -> {} exceeds the 14-bit NRPN range",
            control, address, from, to
        )));
    }
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn ch(label: &str) -> ChannelRef {
        label.parse().unwrap()
    }

    #[test]
    fn test_reference_addresses() {
        assert_eq!(address(ControlType::Mute, ch("IP1"), ch("LR")).unwrap(), 0);
        assert_eq!(address(ControlType::Mute, ch("IP2"), ch("AUX1")).unwrap(), 129);
        assert_eq!(address(ControlType::Fader, ch("IP1"), ch("LR")).unwrap(), 8192);
        assert_eq!(address(ControlType::Pan, ch("FXRTN1"), ch("LR")).unwrap(), 10240 + 48);
        assert_eq!(address(ControlType::Mute, ch("IP48"), ch("MTX12")).unwrap(), 5120 + 47);
    }

    #[test]
    fn test_master_addresses() {
        assert_eq!(address(ControlType::Mute, ch("LR"), ch("LR")).unwrap(), 2424);
        assert_eq!(address(ControlType::Mute, ch("AUX1"), ch("AUX1")).unwrap(), 2504);
        assert_eq!(address(ControlType::Mute, ch("GRP12"), ch("GRP12")).unwrap(), 2527);
        assert_eq!(address(ControlType::Mute, ch("FXSND4"), ch("FXSND4")).unwrap(), 2531);
        assert_eq!(address(ControlType::Mute, ch("FXRTN8"), ch("FXRTN8")).unwrap(), 2539);
        assert_eq!(address(ControlType::Fader, ch("MTX12"), ch("MTX12")).unwrap(), 8192 + 2551);
    }

    #[test]
    fn test_invalid_pairs() {
        assert!(address(ControlType::Mute, ch("LR"), ch("IP1")).is_err());
        assert!(address(ControlType::Mute, ch("IP1"), ch("IP1")).is_err());
        assert!(address(ControlType::Mute, ch("AUX1"), ch("AUX2")).is_err());
    }

    #[test]
    fn test_assign_beyond_14_bits_is_rejected() {
        assert!(address(ControlType::Assign, ch("IP1"), ch("MTX3")).is_ok());
        let err = address(ControlType::Assign, ch("IP1"), ch("MTX12")).unwrap_err();
        assert!(matches!(err, DeviceError::Address(_)));
    }

    #[test]
    fn test_label_parsing() {
        assert_eq!(ch("ip12"), ChannelRef { class: ChannelClass::Input, number: 12 });
        assert_eq!(ch("FXRTN3").class, ChannelClass::FxReturn);
        assert_eq!(ch("FXSND3").class, ChannelClass::FxSend);
        assert_eq!(ch("lr"), ChannelRef::LR);
        assert!("IP49".parse::<ChannelRef>().is_err());
        assert!("IP0".parse::<ChannelRef>().is_err());
        assert!("LR2".parse::<ChannelRef>().is_err());
        assert!("BUS1".parse::<ChannelRef>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for channel in ChannelRef::all() {
            assert_eq!(channel.to_string().parse::<ChannelRef>().unwrap(), channel);
        }
    }

    #[test]
    fn test_injective_per_control_type() {
        let channels = ChannelRef::all();
        for control in ControlType::ALL {
            let mut seen: HashMap<u16, (ChannelRef, ChannelRef)> = HashMap::new();
            for &from in &channels {
                for &to in &channels {
                    if let Ok(addr) = address(control, from, to) {
                        if let Some(prev) = seen.insert(addr, (from, to)) {
                            panic!("{:?}: {:?} and {:?} share address {}", control, prev, (from, to), addr);
                        }
                    }
                }
            }
            assert!(seen.len() > 1500);
        }
    }

    proptest! {
        #[test]
        fn prop_address_is_deterministic(from in 0usize..97, to in 0usize..97, control in 0usize..4) {
            let channels = ChannelRef::all();
            let (from, to) = (channels[from], channels[to]);
            let control = ControlType::ALL[control];
            let first = address(control, from, to).ok();
            let second = address(control, from, to).ok();
            prop_assert_eq!(first, second);
            if let Some(addr) = first {
                prop_assert!(addr >= control.base());
                prop_assert!(addr <= MAX_14BIT);
            }
        }
    }
}
