//! High-rate debug wire format.
//!
//! One fixed 12-byte frame per control cycle, streamed out a DMA-driven
//! UART at 5Mbaud 8N1. Receivers resynchronize on the sync byte.
//!
//! | Offset | Size | Content |
//! |--------|------|---------------------------------------|
//! | 0      | 1    | sync byte `0x5a`                      |
//! | 1      | 1    | `u8(255 * electrical_theta / 2pi)`    |
//! | 2      | 1    | `i8(i_d command * 2)`                 |
//! | 3      | 2    | `i16(d_A * 500)`                      |
//! | 5      | 2    | `i16(32767 * pid_d.p / 12)`           |
//! | 7      | 2    | `i16(32767 * pid_d.integral / 12)`    |
//! | 9      | 2    | `i16(32767 * d_V / 12)`               |
//! | 11     | 1    | `i8(127 * velocity / 10)`             |

use core::f32::consts::TAU;

use crate::state::{Control, Status};

/// Frame length on the wire.
pub const FRAME_SIZE: usize = 12;

/// Resynchronization byte at offset 0.
pub const SYNC: u8 = 0x5a;

/// Debug UART line rate [baud].
pub const BAUD_RATE: u32 = 5_000_000;

/// Pack one status frame. Values outside a field's range saturate.
pub fn pack_frame(status: &Status, control: &Control) -> [u8; FRAME_SIZE] {
    let mut frame = [0u8; FRAME_SIZE];

    frame[0] = SYNC;
    frame[1] = (255.0 * status.electrical_theta / TAU) as u8;
    frame[2] = (control.i_d_amps * 2.0) as i8 as u8;
    frame[3..5].copy_from_slice(&((status.d_amps * 500.0) as i16).to_le_bytes());
    frame[5..7].copy_from_slice(&((32767.0 * status.pid_d.p / 12.0) as i16).to_le_bytes());
    frame[7..9].copy_from_slice(&((32767.0 * status.pid_d.integral / 12.0) as i16).to_le_bytes());
    frame[9..11].copy_from_slice(&((32767.0 * control.d_volts / 12.0) as i16).to_le_bytes());
    frame[11] = (127.0 * status.velocity / 10.0) as i8 as u8;

    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let mut status = Status::default();
        status.electrical_theta = TAU / 2.0;
        status.d_amps = 1.0;
        status.pid_d.p = 6.0;
        status.pid_d.integral = -6.0;
        status.velocity = 5.0;

        let mut control = Control::default();
        control.i_d_amps = 3.0;
        control.d_volts = 12.0;

        let frame = pack_frame(&status, &control);

        assert_eq!(frame[0], SYNC);
        assert_eq!(frame[1], 127); // half a revolution
        assert_eq!(frame[2], 6); // 3A * 2
        assert_eq!(i16::from_le_bytes([frame[3], frame[4]]), 500);
        assert_eq!(i16::from_le_bytes([frame[5], frame[6]]), 16383);
        assert_eq!(i16::from_le_bytes([frame[7], frame[8]]), -16383);
        assert_eq!(i16::from_le_bytes([frame[9], frame[10]]), 32767);
        assert_eq!(frame[11] as i8, 63); // 5 units/s of 10 full scale
    }

    #[test]
    fn test_negative_values_wrap_to_twos_complement() {
        let mut status = Status::default();
        status.velocity = -5.0;
        let mut control = Control::default();
        control.i_d_amps = -2.0;

        let frame = pack_frame(&status, &control);
        assert_eq!(frame[2] as i8, -4);
        assert_eq!(frame[11] as i8, -63);
    }

    #[test]
    fn test_out_of_range_saturates() {
        let mut status = Status::default();
        status.d_amps = 1000.0; // 500000 >> i16::MAX
        status.velocity = 100.0;
        let control = Control::default();

        let frame = pack_frame(&status, &control);
        assert_eq!(i16::from_le_bytes([frame[3], frame[4]]), i16::MAX);
        assert_eq!(frame[11] as i8, i8::MAX);
    }

    #[test]
    fn test_idle_frame() {
        let frame = pack_frame(&Status::default(), &Control::default());
        assert_eq!(frame[0], SYNC);
        assert!(frame[1..].iter().all(|&b| b == 0));
    }
}
