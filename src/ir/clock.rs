use super::FreezeFlag;
use crate::error::Error;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

const NS_PER_S: i128 = 1_000_000_000;

/// Describes how a stream's clock counts cycles and how those cycles map to
/// nanoseconds from an origin.
///
/// Mutable until attached as a stream class's default clock class.
#[derive(Clone, Debug)]
pub struct ClockClass {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    frozen: FreezeFlag,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    frequency: u64,
    precision: u64,
    offset_seconds: i64,
    offset_cycles: u64,
    origin_is_unix_epoch: bool,
    uuid: Option<Uuid>,
    name: Option<String>,
    description: Option<String>,
}

impl ClockClass {
    /// A clock class counting at the given frequency, in Hz.
    pub fn new(frequency: u64) -> Result<Self, Error> {
        if frequency == 0 {
            return Err(Error::invalid_params("clock frequency must be nonzero"));
        }
        Ok(ClockClass {
            inner: Arc::new(Inner {
                frozen: FreezeFlag::default(),
                state: Mutex::new(State {
                    frequency,
                    precision: 0,
                    offset_seconds: 0,
                    offset_cycles: 0,
                    origin_is_unix_epoch: true,
                    uuid: None,
                    name: None,
                    description: None,
                }),
            }),
        })
    }

    pub fn frequency(&self) -> u64 {
        self.inner.state.lock().frequency
    }

    pub fn precision(&self) -> u64 {
        self.inner.state.lock().precision
    }

    /// Offset from the origin as (seconds, cycles), with cycles < frequency.
    pub fn offset(&self) -> (i64, u64) {
        let state = self.inner.state.lock();
        (state.offset_seconds, state.offset_cycles)
    }

    pub fn origin_is_unix_epoch(&self) -> bool {
        self.inner.state.lock().origin_is_unix_epoch
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.inner.state.lock().uuid
    }

    pub fn name(&self) -> Option<String> {
        self.inner.state.lock().name.clone()
    }

    pub fn description(&self) -> Option<String> {
        self.inner.state.lock().description.clone()
    }

    pub fn set_frequency(&self, frequency: u64) -> Result<(), Error> {
        self.inner.frozen.check_mutable("clock class")?;
        if frequency == 0 {
            return Err(Error::invalid_params("clock frequency must be nonzero"));
        }
        self.inner.state.lock().frequency = frequency;
        Ok(())
    }

    pub fn set_precision(&self, precision: u64) -> Result<(), Error> {
        self.inner.frozen.check_mutable("clock class")?;
        self.inner.state.lock().precision = precision;
        Ok(())
    }

    pub fn set_offset(&self, seconds: i64, cycles: u64) -> Result<(), Error> {
        self.inner.frozen.check_mutable("clock class")?;
        let mut state = self.inner.state.lock();
        if cycles >= state.frequency {
            return Err(Error::invalid_params(
                "clock offset cycles must be less than the frequency",
            ));
        }
        state.offset_seconds = seconds;
        state.offset_cycles = cycles;
        Ok(())
    }

    pub fn set_origin_is_unix_epoch(&self, origin_is_unix_epoch: bool) -> Result<(), Error> {
        self.inner.frozen.check_mutable("clock class")?;
        self.inner.state.lock().origin_is_unix_epoch = origin_is_unix_epoch;
        Ok(())
    }

    pub fn set_uuid(&self, uuid: Uuid) -> Result<(), Error> {
        self.inner.frozen.check_mutable("clock class")?;
        self.inner.state.lock().uuid = Some(uuid);
        Ok(())
    }

    pub fn set_name(&self, name: impl Into<String>) -> Result<(), Error> {
        self.inner.frozen.check_mutable("clock class")?;
        self.inner.state.lock().name = Some(name.into());
        Ok(())
    }

    pub fn set_description(&self, description: impl Into<String>) -> Result<(), Error> {
        self.inner.frozen.check_mutable("clock class")?;
        self.inner.state.lock().description = Some(description.into());
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.is_frozen()
    }

    pub(crate) fn freeze(&self) {
        self.inner.frozen.freeze();
    }

    /// Converts a cycle count to nanoseconds from the clock's origin.
    ///
    /// Fails with [`Error::ClockOverflow`] iff the mathematical result lies
    /// outside the signed 64-bit range.
    pub fn cycles_to_ns_from_origin(&self, cycles: u64) -> Result<i64, Error> {
        let state = self.inner.state.lock();
        let frequency = state.frequency as i128;
        let offset_ns = state.offset_seconds as i128 * NS_PER_S;
        let cycles_ns = (state.offset_cycles as i128 + cycles as i128) * NS_PER_S / frequency;
        let ns = offset_ns + cycles_ns;
        i64::try_from(ns).map_err(|_| Error::ClockOverflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn zero_frequency_is_rejected() {
        assert!(ClockClass::new(0).is_err());
        let cc = ClockClass::new(1_000_000_000).unwrap();
        assert!(cc.set_frequency(0).is_err());
    }

    #[test]
    fn identity_conversion_at_gigahertz() {
        let cc = ClockClass::new(1_000_000_000).unwrap();
        assert_eq!(
            cc.cycles_to_ns_from_origin(1_000_000_000).unwrap(),
            1_000_000_000
        );
        assert_eq!(cc.cycles_to_ns_from_origin(0).unwrap(), 0);
    }

    #[test]
    fn one_hertz_overflows_on_huge_cycle_counts() {
        let cc = ClockClass::new(1).unwrap();
        assert!(matches!(
            cc.cycles_to_ns_from_origin(1 << 63),
            Err(Error::ClockOverflow)
        ));
        assert_eq!(cc.cycles_to_ns_from_origin(5).unwrap(), 5_000_000_000);
    }

    #[test]
    fn offsets_shift_the_origin() {
        let cc = ClockClass::new(1_000_000_000).unwrap();
        cc.set_offset(2, 500_000_000).unwrap();
        assert_eq!(cc.cycles_to_ns_from_origin(0).unwrap(), 2_500_000_000);
        let cc = ClockClass::new(1_000_000_000).unwrap();
        cc.set_offset(-1, 0).unwrap();
        assert_eq!(cc.cycles_to_ns_from_origin(0).unwrap(), -1_000_000_000);
    }

    #[test]
    fn offset_cycles_must_stay_below_frequency() {
        let cc = ClockClass::new(1000).unwrap();
        assert!(cc.set_offset(0, 1000).is_err());
        assert!(cc.set_offset(0, 999).is_ok());
    }

    #[test]
    fn frozen_clock_class_rejects_mutation() {
        let cc = ClockClass::new(1000).unwrap();
        cc.freeze();
        assert!(matches!(cc.set_name("x"), Err(Error::Frozen(_))));
        assert!(matches!(cc.set_offset(1, 0), Err(Error::Frozen(_))));
        assert_eq!(cc.name(), None);
    }
}
