//! Common Types for the 5G NR slot pipeline
//! 
//! Defines fundamental types shared by the scheduling interface and the L1 core

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::utils::time;
use num_traits::FromPrimitive;

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

/// Physical Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value (0-1007)
    pub const MAX: u16 = 1007;
    
    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }
}

/// A radio slot address: system frame number plus slot within the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SlotId {
    /// System frame number (0-1023)
    pub frame: u16,
    /// Slot index within the frame
    pub slot: u8,
}

impl SlotId {
    pub fn new(frame: u16, slot: u8) -> Self {
        Self { frame, slot }
    }

    /// Slot count since frame 0 of the current hyperframe
    pub fn absolute(&self, slots_per_frame: u16) -> u32 {
        self.frame as u32 * slots_per_frame as u32 + self.slot as u32
    }

    /// Rebuild a slot address from an absolute slot count, wrapping the hyperframe
    pub fn from_absolute(absolute: u32, slots_per_frame: u16) -> Self {
        let spf = slots_per_frame as u32;
        Self {
            frame: time::wrap_frame(absolute / spf),
            slot: (absolute % spf) as u8,
        }
    }

    /// Slot address `n` slots later
    pub fn advance(&self, n: u32, slots_per_frame: u16) -> Self {
        Self::from_absolute(self.absolute(slots_per_frame) + n, slots_per_frame)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.frame, self.slot)
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Spacing from its value in kHz
    pub fn from_khz(khz: u32) -> Option<Self> {
        FromPrimitive::from_u32(khz)
    }

    /// Numerology index (mu)
    pub fn numerology(&self) -> u8 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
            SubcarrierSpacing::Scs240 => 4,
        }
    }

    /// Number of slots per 1 ms subframe
    pub fn slots_per_subframe(&self) -> u16 {
        1 << self.numerology()
    }

    /// Number of slots per 10 ms frame
    pub fn slots_per_frame(&self) -> u16 {
        self.slots_per_subframe() * time::SUBFRAMES_PER_FRAME as u16
    }

    /// Slot period
    pub fn slot_duration(&self) -> Duration {
        Duration::from_nanos((time::slot_duration_us(self.numerology()) * 1000.0) as u64)
    }
}

impl Default for SubcarrierSpacing {
    fn default() -> Self {
        SubcarrierSpacing::Scs30
    }
}

/// Direction(s) a slot carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotType {
    /// Downlink only
    Downlink,
    /// Uplink only
    Uplink,
    /// Both directions (special TDD slot, or any FDD slot)
    Mixed,
}

impl SlotType {
    pub fn carries_downlink(&self) -> bool {
        matches!(self, SlotType::Downlink | SlotType::Mixed)
    }

    pub fn carries_uplink(&self) -> bool {
        matches!(self, SlotType::Uplink | SlotType::Mixed)
    }
}

/// TDD slot pattern, repeated every `dl_slots + mixed_slots + ul_slots` slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TddPattern {
    pub dl_slots: u8,
    pub mixed_slots: u8,
    pub ul_slots: u8,
}

impl TddPattern {
    pub fn period(&self) -> u32 {
        self.dl_slots as u32 + self.mixed_slots as u32 + self.ul_slots as u32
    }
}

/// Duplex mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplexMode {
    /// Frequency Division Duplex
    Fdd,
    /// Time Division Duplex
    Tdd(TddPattern),
}

impl DuplexMode {
    /// Slot type for an absolute slot count
    pub fn slot_type(&self, absolute_slot: u32) -> SlotType {
        match self {
            DuplexMode::Fdd => SlotType::Mixed,
            DuplexMode::Tdd(pattern) => {
                let period = pattern.period();
                if period == 0 {
                    return SlotType::Mixed;
                }
                let pos = absolute_slot % period;
                if pos < pattern.dl_slots as u32 {
                    SlotType::Downlink
                } else if pos < (pattern.dl_slots + pattern.mixed_slots) as u32 {
                    SlotType::Mixed
                } else {
                    SlotType::Uplink
                }
            }
        }
    }
}

impl Default for DuplexMode {
    fn default() -> Self {
        DuplexMode::Fdd
    }
}

bitflags! {
    /// DMRS antenna ports of a shared-channel grant (up to 12 ports)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct DmrsPorts: u16 {
        const PORT0 = 1 << 0;
        const PORT1 = 1 << 1;
        const PORT2 = 1 << 2;
        const PORT3 = 1 << 3;
        const PORT4 = 1 << 4;
        const PORT5 = 1 << 5;
        const PORT6 = 1 << 6;
        const PORT7 = 1 << 7;
        const PORT8 = 1 << 8;
        const PORT9 = 1 << 9;
        const PORT10 = 1 << 10;
        const PORT11 = 1 << 11;
    }
}

impl DmrsPorts {
    /// Number of transmission layers, one per configured port
    pub fn num_layers(&self) -> u8 {
        (self.bits() & Self::all().bits()).count_ones() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_pci_validation() {
        assert!(Pci::new(0).is_some());
        assert!(Pci::new(1007).is_some());
        assert!(Pci::new(1008).is_none());
    }

    #[test]
    fn test_slot_id_wraps_hyperframe() {
        let last = SlotId::new(1023, 19);
        assert_eq!(last.advance(1, 20), SlotId::new(0, 0));
        assert_eq!(SlotId::new(10, 3).advance(18, 20), SlotId::new(11, 1));
        assert_eq!(SlotId::new(10, 3).to_string(), "10.3");
    }

    #[test]
    fn test_numerology() {
        assert_eq!(SubcarrierSpacing::Scs15.slots_per_frame(), 10);
        assert_eq!(SubcarrierSpacing::Scs30.slots_per_frame(), 20);
        assert_eq!(SubcarrierSpacing::Scs30.slot_duration(), Duration::from_micros(500));
        assert_eq!(SubcarrierSpacing::Scs120.numerology(), 3);
        assert_eq!(SubcarrierSpacing::from_khz(60), Some(SubcarrierSpacing::Scs60));
        assert_eq!(SubcarrierSpacing::from_khz(45), None);
    }

    #[test]
    fn test_tdd_slot_types() {
        let tdd = DuplexMode::Tdd(TddPattern { dl_slots: 7, mixed_slots: 1, ul_slots: 2 });
        assert_eq!(tdd.slot_type(0), SlotType::Downlink);
        assert_eq!(tdd.slot_type(7), SlotType::Mixed);
        assert_eq!(tdd.slot_type(9), SlotType::Uplink);
        assert_eq!(tdd.slot_type(10), SlotType::Downlink);
        assert_eq!(DuplexMode::Fdd.slot_type(9), SlotType::Mixed);
    }

    #[test]
    fn test_dmrs_layers() {
        assert_eq!(DmrsPorts::empty().num_layers(), 0);
        assert_eq!((DmrsPorts::PORT0 | DmrsPorts::PORT1).num_layers(), 2);
        assert_eq!(DmrsPorts::from_bits_truncate(0xFFFF).num_layers(), 12);
    }
}
