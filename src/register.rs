//! ST-series control table register map.
//!
//! Offsets and widths mirror the constants imported from `STservo_sdk` in
//! the Python reference backend. Opaque to callers outside the Bus Arbiter:
//! the only externally visible effects are the semantic operations on
//! [`crate::controller::Controller`].

/// A register's address and width in the servo's control table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegisterAddress {
    pub addr: u8,
    pub width: RegisterWidth,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegisterWidth {
    U8,
    U16,
}

impl RegisterWidth {
    pub const fn bytes(self) -> usize {
        match self {
            RegisterWidth::U8 => 1,
            RegisterWidth::U16 => 2,
        }
    }
}

macro_rules! register {
    ($name:ident, $addr:expr, $width:ident) => {
        pub const $name: RegisterAddress = RegisterAddress {
            addr: $addr,
            width: RegisterWidth::$width,
        };
    };
}

// EEPROM area (persisted): id, baud, offsets, limits, dead zones, lock.
register!(ID, 0x05, U8);
register!(BAUD_RATE, 0x06, U8);
register!(MIN_ANGLE_LIMIT_L, 0x09, U16);
register!(MAX_ANGLE_LIMIT_L, 0x0B, U16);
register!(CW_DEAD, 0x1A, U8);
register!(CCW_DEAD, 0x1B, U8);
register!(OFS_L, 0x1F, U16);
register!(LOCK, 0x30, U8);

// RAM area (volatile): goal/present values, mode, torque.
register!(TORQUE_ENABLE, 0x28, U8);
register!(ACC, 0x29, U8);
register!(GOAL_POSITION_L, 0x2A, U16);
register!(GOAL_TIME_L, 0x2C, U16);
register!(GOAL_SPEED_L, 0x2E, U16);
register!(MODE, 0x21, U8);
register!(PRESENT_POSITION_L, 0x38, U16);
register!(PRESENT_SPEED_L, 0x3A, U16);
register!(PRESENT_LOAD_L, 0x3C, U16);
register!(PRESENT_VOLTAGE, 0x3E, U8);
register!(PRESENT_TEMPERATURE, 0x3F, U8);
register!(MOVING, 0x42, U8);
register!(PRESENT_CURRENT_L, 0x45, U16);

/// Wire-mode values for [`MODE`].
pub mod mode {
    /// Position-servo (joint) mode.
    pub const JOINT: u8 = 0;
    /// Continuous rotation (wheel) mode.
    pub const WHEEL: u8 = 1;
}

/// Baud-rate symbol the EEPROM stores for 1,000,000 bps, the baud used
/// throughout this controller's defaults.
pub const BAUD_SYMBOL_1M: u8 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_match_register_kind() {
        assert_eq!(ID.width.bytes(), 1);
        assert_eq!(GOAL_POSITION_L.width.bytes(), 2);
        assert_eq!(PRESENT_VOLTAGE.width.bytes(), 1);
    }
}
