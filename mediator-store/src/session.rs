use crate::record::Record;
use crate::store::StoreContext;
use mediator_core::MediationResult;

/// Save operations on records, run through a mediation context.
///
/// A failed call leaves the record's key, version counter and timestamps as
/// they were before the call, matching the rolled-back rows, so the same
/// instance can be saved again.
pub trait RecordSession {
    /// Saves `record`, mediated according to the configured switches.
    fn save(&self, record: &mut Record) -> MediationResult<()>;

    /// Saves `record`, mediated regardless of the switches.
    fn save_with_mediation(&self, record: &mut Record) -> MediationResult<()>;

    /// Saves `record` as a plain write.
    fn save_without_mediation(&self, record: &mut Record) -> MediationResult<()>;

    /// Moves `updated_at` forward and bumps the version counter, without
    /// mediation. A no-op for unsaved or untimestamped records.
    fn touch(&self, record: &mut Record) -> MediationResult<()>;
}

impl RecordSession for StoreContext<'_> {
    fn save(&self, record: &mut Record) -> MediationResult<()> {
        restoring_on_error(record, |r| {
            self.mediated_transaction(r, |r| self.host().write(self, r))
        })
    }

    fn save_with_mediation(&self, record: &mut Record) -> MediationResult<()> {
        restoring_on_error(record, |r| {
            self.with_mediation(r, |r| self.host().write(self, r))
        })
    }

    fn save_without_mediation(&self, record: &mut Record) -> MediationResult<()> {
        restoring_on_error(record, |r| {
            self.without_mediation(r, |r| self.host().write(self, r))
        })
    }

    fn touch(&self, record: &mut Record) -> MediationResult<()> {
        restoring_on_error(record, |r| self.host().touch_record(self, r))
    }
}

fn restoring_on_error(
    record: &mut Record,
    op: impl FnOnce(&mut Record) -> MediationResult<()>,
) -> MediationResult<()> {
    let saved = record.bookkeeping();
    let result = op(record);
    if result.is_err() {
        record.restore(saved);
    }
    result
}
