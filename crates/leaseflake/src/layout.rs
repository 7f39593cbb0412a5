use core::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Error, Field, Result};

/// The decoded components of a packed ID.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdParts {
    /// Time units elapsed since the layout epoch.
    pub time_unit: u64,
    /// The lease-id held by the issuing instance.
    pub lease_id: u64,
    /// Per-unit sequence number.
    pub sequence: u64,
}

/// Bit layout of a 64-bit lease-based ID.
///
/// ```text
///  Bit Index:  63          62 ...                                           0
///              +----------+----------------+----------------+--------------+
///  Field:      | sign (1) | time unit (T)  | lease-id (L)   | sequence (S) |
///              +----------+----------------+----------------+--------------+
///              |<----------- MSB --------- 64 bits -------- LSB ---------->|
/// ```
///
/// `T + L + S` must equal 63 so that the sign bit is always zero. The time
/// unit field counts `time_unit_ms` quanta since `epoch`.
///
/// Changing any width after IDs have been issued is a breaking change that
/// cannot be detected from the IDs themselves.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BitLayout {
    time_unit_bits: u32,
    lease_id_bits: u32,
    sequence_bits: u32,
    time_unit_ms: u64,
    epoch_ms: u64,
}

/// Number of value bits available below the sign bit.
pub const PAYLOAD_BITS: u32 = 63;

impl BitLayout {
    /// 42-bit millisecond timestamp, 2048 lease-ids, 1024 IDs per millisecond.
    ///
    /// Timestamps count from the UNIX epoch and remain valid until 2109.
    pub const TIME_CHANNEL: Self = Self {
        time_unit_bits: 42,
        lease_id_bits: 11,
        sequence_bits: 10,
        time_unit_ms: 1,
        epoch_ms: 0,
    };

    /// 38-bit timestamp in 16 ms units, 16384 lease-ids, 2048 IDs per unit.
    ///
    /// Suited to large fleets with moderate per-instance rates. Timestamps
    /// count from the UNIX epoch and remain valid until 2109.
    pub const TIMING_BRICK: Self = Self {
        time_unit_bits: 38,
        lease_id_bits: 14,
        sequence_bits: 11,
        time_unit_ms: 16,
        epoch_ms: 0,
    };

    /// Creates a layout with a 1 ms time unit and the UNIX epoch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] unless the three widths sum to 63 and
    /// the time unit field is at least one bit wide.
    pub fn new(time_unit_bits: u32, lease_id_bits: u32, sequence_bits: u32) -> Result<Self> {
        let layout = Self {
            time_unit_bits,
            lease_id_bits,
            sequence_bits,
            time_unit_ms: 1,
            epoch_ms: 0,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Returns a copy of this layout with a different time unit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] if `time_unit_ms` is zero or the last
    /// time unit would start past `u64::MAX` milliseconds.
    pub fn with_time_unit_ms(self, time_unit_ms: u64) -> Result<Self> {
        let layout = Self {
            time_unit_ms,
            ..self
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Returns a copy of this layout counting time from `epoch` (a duration
    /// since 1970-01-01 UTC).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] if the epoch does not fit in `u64`
    /// milliseconds or pushes the last time unit past `u64::MAX`.
    pub fn with_epoch(self, epoch: Duration) -> Result<Self> {
        let epoch_ms = u64::try_from(epoch.as_millis()).map_err(|_| Error::InvalidLayout {
            reason: format!("epoch {epoch:?} does not fit in u64 milliseconds"),
        })?;
        let layout = Self { epoch_ms, ..self };
        layout.validate()?;
        Ok(layout)
    }

    /// Checks the width invariant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let total = self
            .time_unit_bits
            .checked_add(self.lease_id_bits)
            .and_then(|t| t.checked_add(self.sequence_bits));
        if total != Some(PAYLOAD_BITS) {
            return Err(Error::InvalidLayout {
                reason: format!(
                    "1 sign bit + {} time + {} lease-id + {} sequence bits must total 64",
                    self.time_unit_bits, self.lease_id_bits, self.sequence_bits
                ),
            });
        }
        if self.time_unit_bits == 0 {
            return Err(Error::InvalidLayout {
                reason: "time unit field must be at least 1 bit".to_string(),
            });
        }
        if self.time_unit_ms == 0 {
            return Err(Error::InvalidLayout {
                reason: "time unit must be at least 1 ms".to_string(),
            });
        }
        // The start of the last unit must be representable.
        let last_unit_start = self
            .max_time_unit()
            .checked_mul(self.time_unit_ms)
            .and_then(|ms| ms.checked_add(self.epoch_ms));
        if last_unit_start.is_none() {
            return Err(Error::InvalidLayout {
                reason: format!(
                    "{} time bits of {} ms from epoch {} ms overflow u64 milliseconds",
                    self.time_unit_bits, self.time_unit_ms, self.epoch_ms
                ),
            });
        }
        Ok(())
    }

    pub const fn time_unit_bits(&self) -> u32 {
        self.time_unit_bits
    }

    pub const fn lease_id_bits(&self) -> u32 {
        self.lease_id_bits
    }

    pub const fn sequence_bits(&self) -> u32 {
        self.sequence_bits
    }

    pub const fn time_unit_ms(&self) -> u64 {
        self.time_unit_ms
    }

    /// The epoch as milliseconds since 1970-01-01 UTC.
    pub const fn epoch_ms(&self) -> u64 {
        self.epoch_ms
    }

    const fn mask(bits: u32) -> u64 {
        if bits == 0 { 0 } else { u64::MAX >> (64 - bits) }
    }

    /// Largest encodable time unit.
    pub const fn max_time_unit(&self) -> u64 {
        Self::mask(self.time_unit_bits)
    }

    /// Largest encodable lease-id; `max_lease_id() + 1` leases may be live at
    /// once.
    pub const fn max_lease_id(&self) -> u64 {
        Self::mask(self.lease_id_bits)
    }

    /// Largest sequence within a single time unit.
    pub const fn max_sequence(&self) -> u64 {
        Self::mask(self.sequence_bits)
    }

    /// Shift of the lease-id field.
    pub const fn lease_id_shift(&self) -> u32 {
        self.sequence_bits
    }

    /// Shift of the time unit field.
    pub const fn time_unit_shift(&self) -> u32 {
        self.lease_id_bits + self.sequence_bits
    }

    /// Packs the components, masking each to its field width.
    ///
    /// Inputs are expected to be in range; this is asserted in debug builds.
    /// Use [`BitLayout::try_encode`] to reject out-of-range values instead.
    pub const fn encode(&self, time_unit: u64, lease_id: u64, sequence: u64) -> u64 {
        debug_assert!(time_unit <= self.max_time_unit());
        debug_assert!(lease_id <= self.max_lease_id());
        debug_assert!(sequence <= self.max_sequence());
        ((time_unit & self.max_time_unit()) << self.time_unit_shift())
            | ((lease_id & self.max_lease_id()) << self.lease_id_shift())
            | (sequence & self.max_sequence())
    }

    /// Packs the components, rejecting values that do not fit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldOverflow`] naming the offending field.
    pub fn try_encode(&self, time_unit: u64, lease_id: u64, sequence: u64) -> Result<u64> {
        check(Field::TimeUnit, time_unit, self.max_time_unit())?;
        check(Field::LeaseId, lease_id, self.max_lease_id())?;
        check(Field::Sequence, sequence, self.max_sequence())?;
        Ok(self.encode(time_unit, lease_id, sequence))
    }

    /// Unpacks an ID into its components.
    pub const fn decode(&self, id: u64) -> IdParts {
        IdParts {
            time_unit: (id >> self.time_unit_shift()) & self.max_time_unit(),
            lease_id: (id >> self.lease_id_shift()) & self.max_lease_id(),
            sequence: id & self.max_sequence(),
        }
    }

    /// Milliseconds since the UNIX epoch at which the ID's time unit began.
    pub const fn timestamp_millis(&self, id: u64) -> u64 {
        self.unit_start_millis(self.decode(id).time_unit)
    }

    /// Wall-clock time at which the ID's time unit began.
    pub fn system_time(&self, id: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.timestamp_millis(id))
    }

    /// The time unit containing `millis` (milliseconds since the UNIX epoch).
    ///
    /// Instants before the layout epoch map to unit zero.
    pub const fn unit_of(&self, millis: u64) -> u64 {
        millis.saturating_sub(self.epoch_ms) / self.time_unit_ms
    }

    /// The first whole unit starting at or after `millis`.
    pub const fn first_unit_at_or_after(&self, millis: u64) -> u64 {
        millis.saturating_sub(self.epoch_ms).div_ceil(self.time_unit_ms)
    }

    /// Milliseconds since the UNIX epoch at which `unit` begins.
    pub const fn unit_start_millis(&self, unit: u64) -> u64 {
        unit * self.time_unit_ms + self.epoch_ms
    }
}

impl Default for BitLayout {
    fn default() -> Self {
        Self::TIME_CHANNEL
    }
}

fn check(field: Field, value: u64, max: u64) -> Result<()> {
    if value > max {
        return Err(Error::FieldOverflow { field, value, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_time_channel_scenario() {
        let layout = BitLayout::new(42, 11, 10).unwrap();
        let id = layout.encode(1000, 5, 3);
        assert_eq!(id, (1000 << 21) | (5 << 10) | 3);
        assert_eq!(
            layout.decode(id),
            IdParts {
                time_unit: 1000,
                lease_id: 5,
                sequence: 3
            }
        );
    }

    #[test]
    fn presets_are_valid() {
        BitLayout::TIME_CHANNEL.validate().unwrap();
        BitLayout::TIMING_BRICK.validate().unwrap();
        assert_eq!(BitLayout::TIME_CHANNEL.max_lease_id(), 2047);
        assert_eq!(BitLayout::TIME_CHANNEL.max_sequence(), 1023);
        assert_eq!(BitLayout::TIMING_BRICK.max_lease_id(), 16383);
        assert_eq!(BitLayout::TIMING_BRICK.max_sequence(), 2047);
    }

    #[test]
    fn rejects_time_ranges_beyond_u64_millis() {
        assert!(matches!(
            BitLayout::TIME_CHANNEL.with_time_unit_ms(10_000_000),
            Err(Error::InvalidLayout { .. })
        ));
        assert!(matches!(
            BitLayout::TIME_CHANNEL.with_epoch(Duration::from_millis(u64::MAX - 10)),
            Err(Error::InvalidLayout { .. })
        ));
        assert!(matches!(
            BitLayout::TIME_CHANNEL.with_epoch(Duration::MAX),
            Err(Error::InvalidLayout { .. })
        ));

        // The largest accepted unit still decodes the last time unit exactly.
        let max_unit_ms = u64::MAX / BitLayout::TIME_CHANNEL.max_time_unit();
        let layout = BitLayout::TIME_CHANNEL
            .with_time_unit_ms(max_unit_ms)
            .unwrap();
        let id = layout.encode(layout.max_time_unit(), 0, 0);
        assert_eq!(
            layout.timestamp_millis(id),
            layout.max_time_unit() * max_unit_ms
        );
    }

    #[test]
    fn rejects_widths_that_do_not_fill_payload() {
        assert!(matches!(
            BitLayout::new(41, 11, 10),
            Err(Error::InvalidLayout { .. })
        ));
        assert!(matches!(
            BitLayout::new(42, 12, 10),
            Err(Error::InvalidLayout { .. })
        ));
        assert!(matches!(
            BitLayout::new(0, 53, 10),
            Err(Error::InvalidLayout { .. })
        ));
        assert!(matches!(
            BitLayout::TIME_CHANNEL.with_time_unit_ms(0),
            Err(Error::InvalidLayout { .. })
        ));
    }

    #[test]
    fn sign_bit_stays_clear_at_field_maximums() {
        for layout in [BitLayout::TIME_CHANNEL, BitLayout::TIMING_BRICK] {
            let id = layout.encode(
                layout.max_time_unit(),
                layout.max_lease_id(),
                layout.max_sequence(),
            );
            assert_eq!(id, i64::MAX as u64);
            let parts = layout.decode(id);
            assert_eq!(parts.time_unit, layout.max_time_unit());
            assert_eq!(parts.lease_id, layout.max_lease_id());
            assert_eq!(parts.sequence, layout.max_sequence());
        }
    }

    #[test]
    fn decode_inverts_encode_across_field_edges() {
        let layout = BitLayout::TIMING_BRICK;
        let units = [0, 1, 12345, layout.max_time_unit() - 1, layout.max_time_unit()];
        let leases = [0, 1, 777, layout.max_lease_id()];
        let sequences = [0, 1, layout.max_sequence()];
        for &time_unit in &units {
            for &lease_id in &leases {
                for &sequence in &sequences {
                    let parts = IdParts {
                        time_unit,
                        lease_id,
                        sequence,
                    };
                    let id = layout.try_encode(time_unit, lease_id, sequence).unwrap();
                    assert_eq!(layout.decode(id), parts);
                }
            }
        }
    }

    #[test]
    fn try_encode_reports_overflowing_field() {
        let layout = BitLayout::TIME_CHANNEL;
        assert_eq!(
            layout.try_encode(1, 2048, 0),
            Err(Error::FieldOverflow {
                field: Field::LeaseId,
                value: 2048,
                max: 2047
            })
        );
        assert_eq!(
            layout.try_encode(1, 0, 1024),
            Err(Error::FieldOverflow {
                field: Field::Sequence,
                value: 1024,
                max: 1023
            })
        );
    }

    #[test]
    fn timestamp_follows_unit_and_epoch() {
        let layout = BitLayout::TIMING_BRICK
            .with_epoch(Duration::from_millis(1_000))
            .unwrap();
        let millis = 1_000 + 16 * 500 + 7;
        let unit = layout.unit_of(millis);
        assert_eq!(unit, 500);
        assert_eq!(layout.first_unit_at_or_after(millis), 501);
        assert_eq!(layout.first_unit_at_or_after(1_000 + 16 * 500), 500);

        let id = layout.encode(unit, 3, 0);
        assert_eq!(layout.timestamp_millis(id), 1_000 + 16 * 500);
        assert_eq!(
            layout.system_time(id),
            UNIX_EPOCH + Duration::from_millis(1_000 + 16 * 500)
        );
    }

    #[test]
    fn ids_order_by_time_then_lease_then_sequence() {
        let layout = BitLayout::TIME_CHANNEL;
        assert!(layout.encode(10, 0, 0) > layout.encode(9, 2047, 1023));
        assert!(layout.encode(10, 1, 0) > layout.encode(10, 0, 1023));
        assert!(layout.encode(10, 1, 1) > layout.encode(10, 1, 0));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn layout_and_parts_serialize_by_field_name() {
        let layout = BitLayout::TIMING_BRICK;
        let json = serde_json::to_value(layout).unwrap();
        assert_eq!(json["time_unit_ms"], 16);
        assert_eq!(serde_json::from_value::<BitLayout>(json).unwrap(), layout);

        let parts = layout.decode(layout.encode(7, 3, 1));
        let json = serde_json::to_string(&parts).unwrap();
        assert_eq!(json, r#"{"time_unit":7,"lease_id":3,"sequence":1}"#);
    }
}
