//! The query service.
//!
//! Read-side facade: current values in every encoding, buffered samples
//! (streamed as JSON or one sample at a time), statistical queries over an
//! Observation's buffer, and tree snapshots.

use crate::error::{HubError, Result};
use crate::hub::Hub;
use crate::sample::DataSample;
use crate::snapshot::{self, SnapshotOptions};
use crate::tree::EntryId;
use crate::types::DataType;
use std::io::Write;
use std::rc::Rc;

/// Query facade over the hub.
pub struct QueryService<'a> {
    hub: &'a mut Hub,
}

impl<'a> QueryService<'a> {
    pub fn new(hub: &'a mut Hub) -> QueryService<'a> {
        QueryService { hub }
    }

    fn resolve(&self, path: &str) -> Result<EntryId> {
        self.hub.find_absolute(path).ok_or(HubError::NotFound)
    }

    // ── Current values ──

    pub fn get_timestamp(&self, path: &str) -> Result<f64> {
        self.hub.get_timestamp(self.resolve(path)?)
    }

    pub fn get_boolean(&self, path: &str) -> Result<bool> {
        self.hub.get_boolean(self.resolve(path)?)
    }

    pub fn get_numeric(&self, path: &str) -> Result<f64> {
        self.hub.get_numeric(self.resolve(path)?)
    }

    pub fn get_string(&self, path: &str) -> Result<String> {
        self.hub.get_string(self.resolve(path)?)
    }

    pub fn get_json(&self, path: &str) -> Result<String> {
        self.hub.get_json(self.resolve(path)?)
    }

    pub fn get_data_type(&self, path: &str) -> Result<DataType> {
        self.hub
            .data_type(self.resolve(path)?)
            .ok_or(HubError::NotFound)
    }

    pub fn get_json_example(&self, path: &str) -> Result<Option<String>> {
        let id = self.resolve(path)?;
        Ok(self.hub.get_json_example(id).map(|s| s.to_json_string()))
    }

    // ── Buffer reads ──

    /// Stream buffered samples newer than `start_after` as a JSON array of
    /// `{"t":...,"v":...}` records.
    ///
    /// `start_after` follows the 30-year pivot: small values are
    /// seconds-before-now, large values absolute epoch seconds, NaN reads
    /// the whole buffer.
    pub fn read_buffer_json(
        &self,
        path: &str,
        start_after: f64,
        writer: &mut dyn Write,
    ) -> Result<()> {
        let id = self.resolve(path)?;
        self.hub.read_buffer_json(id, start_after, writer)
    }

    /// The oldest buffered sample newer than `start_after`.
    pub fn find_buffered_sample_after(
        &self,
        path: &str,
        start_after: f64,
    ) -> Result<Option<Rc<DataSample>>> {
        let id = self.resolve(path)?;
        Ok(self.hub.find_buffered_sample_after(id, start_after))
    }

    // ── Statistics ──

    pub fn query_min(&self, path: &str, start_time: f64) -> Result<f64> {
        Ok(self.hub.query_min(self.resolve(path)?, start_time))
    }

    pub fn query_max(&self, path: &str, start_time: f64) -> Result<f64> {
        Ok(self.hub.query_max(self.resolve(path)?, start_time))
    }

    pub fn query_mean(&self, path: &str, start_time: f64) -> Result<f64> {
        Ok(self.hub.query_mean(self.resolve(path)?, start_time))
    }

    pub fn query_std_dev(&self, path: &str, start_time: f64) -> Result<f64> {
        Ok(self.hub.query_std_dev(self.resolve(path)?, start_time))
    }

    // ── Snapshots ──

    /// Stream a snapshot of the tree. See [`snapshot::write_snapshot`].
    pub fn snapshot(&mut self, options: &SnapshotOptions, writer: &mut dyn Write) -> Result<()> {
        snapshot::write_snapshot(self.hub, options, writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{AdminService, IoService};

    fn hub_with_buffered_obs() -> Hub {
        let mut hub = Hub::default();
        {
            let mut io = IoService::new(&mut hub, "a").unwrap();
            io.create_input("temp", DataType::Numeric, "").unwrap();
        }
        {
            let mut admin = AdminService::new(&mut hub);
            admin.create_observation("o1").unwrap();
            admin.set_buffer_max_count("o1", 8).unwrap();
            admin.set_source("o1", Some("/app/a/temp")).unwrap();
        }
        {
            let mut io = IoService::new(&mut hub, "a").unwrap();
            for (ts, v) in [(1000.0, 1.0), (2000.0, 2.0), (3000.0, 6.0)] {
                io.push_numeric("temp", ts, v).unwrap();
            }
        }
        hub
    }

    #[test]
    fn test_read_buffer_json() {
        let mut hub = hub_with_buffered_obs();
        let query = QueryService::new(&mut hub);
        let mut out = Vec::new();
        query
            .read_buffer_json("/obs/o1", f64::NAN, &mut out)
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[{\"t\":1000,\"v\":1.000000},{\"t\":2000,\"v\":2.000000},{\"t\":3000,\"v\":6.000000}]"
        );
    }

    #[test]
    fn test_statistics() {
        let mut hub = hub_with_buffered_obs();
        hub.set_clock(|| 4000.0);
        let query = QueryService::new(&mut hub);

        assert_eq!(query.query_min("/obs/o1", f64::NAN).unwrap(), 1.0);
        assert_eq!(query.query_max("/obs/o1", f64::NAN).unwrap(), 6.0);
        assert_eq!(query.query_mean("/obs/o1", f64::NAN).unwrap(), 3.0);

        // Relative window: only samples in the last 2500 seconds.
        assert_eq!(query.query_min("/obs/o1", 2500.0).unwrap(), 2.0);

        // Statistics on a non-observation are NaN.
        assert!(query.query_mean("/app/a/temp", f64::NAN).unwrap().is_nan());
    }

    #[test]
    fn test_find_buffered_sample_after() {
        let mut hub = hub_with_buffered_obs();
        hub.set_clock(|| 4000.0);
        let query = QueryService::new(&mut hub);
        let sample = query
            .find_buffered_sample_after("/obs/o1", 2_500.0)
            .unwrap()
            .unwrap();
        // 2500 is below the pivot: seconds-before-now = t > 1500.
        assert_eq!(sample.timestamp(), 2000.0);
    }

    #[test]
    fn test_get_json_any_type() {
        let mut hub = hub_with_buffered_obs();
        let query = QueryService::new(&mut hub);
        assert_eq!(query.get_json("/app/a/temp").unwrap(), "6.000000");
        assert!(matches!(
            query.get_boolean("/app/a/temp"),
            Err(HubError::FormatError(_))
        ));
        assert!(matches!(
            query.get_numeric("/missing"),
            Err(HubError::NotFound)
        ));
    }
}
