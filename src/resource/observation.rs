//! Observation state: filters, transform, circular buffer, backup
//! bookkeeping and statistical queries.
//!
//! Filtering and transforms are pure functions over observation state; the
//! push pipeline in the hub drives them and owns the side effects (current
//! value update, handler dispatch, propagation).

use crate::sample::DataSample;
use crate::types::{DataType, TransformType};
use std::collections::VecDeque;
use std::rc::Rc;

/// Outcome of running a sample through an Observation's filter chain.
pub(crate) enum FilterOutcome {
    /// Accepted, possibly replaced by a JSON-extracted sub-value.
    Accept(DataType, Rc<DataSample>),
    /// Rejected by policy. This is silent success, not an error.
    Reject,
}

/// Observation variant tail.
pub(crate) struct ObservationBody {
    /// Minimum seconds between accepted samples. 0 = no throttling.
    pub min_period: f64,
    /// Magnitude a new value must differ from the current one by.
    /// 0 = no change filtering.
    pub change_by: f64,
    /// Lowest accepted value. NaN = no lower limit.
    pub low_limit: f64,
    /// Highest accepted value. NaN = no upper limit.
    pub high_limit: f64,
    /// Circular buffer capacity. 0 disables retention but not delivery.
    pub buffer_max: u32,
    /// Minimum seconds between buffer backups. 0 = backups disabled.
    pub backup_period: u32,
    pub transform: TransformType,
    /// JSON member/element extraction spec. "" = not set.
    pub json_extraction: String,
    /// External destination label, or a path-shaped implicit route. "" = none.
    pub destination: String,
    /// Whether this observation was installed by the config service.
    pub is_config: bool,
    /// FIFO circular buffer of accepted (pre-transform) samples.
    pub buffer: VecDeque<Rc<DataSample>>,
    /// Data type of the buffered samples (the last accepted type).
    pub buffer_type: DataType,
    /// Timestamp of the last accepted sample, for min-period filtering.
    pub last_accepted_ts: Option<f64>,
    /// Buffer changed since the last backup.
    pub backup_dirty: bool,
    /// Wall-clock time of the last completed backup.
    pub last_backup: f64,
}

impl ObservationBody {
    pub fn new() -> ObservationBody {
        ObservationBody {
            min_period: 0.0,
            change_by: 0.0,
            low_limit: f64::NAN,
            high_limit: f64::NAN,
            buffer_max: 0,
            backup_period: 0,
            transform: TransformType::None,
            json_extraction: String::new(),
            destination: String::new(),
            is_config: false,
            buffer: VecDeque::new(),
            buffer_type: DataType::Trigger,
            last_accepted_ts: None,
            backup_dirty: false,
            last_backup: 0.0,
        }
    }

    /// Run the filter chain on an incoming sample.
    ///
    /// Rules are evaluated in order: min-period, change-by, low/high limit,
    /// JSON extraction. The first rule that fires rejects the sample.
    pub fn filter(
        &self,
        current: Option<&Rc<DataSample>>,
        data_type: DataType,
        sample: &Rc<DataSample>,
    ) -> FilterOutcome {
        if self.min_period > 0.0 {
            if let Some(last) = self.last_accepted_ts {
                if sample.timestamp() - last < self.min_period {
                    return FilterOutcome::Reject;
                }
            }
        }

        if self.change_by != 0.0 && data_type != DataType::Trigger {
            if let Some(current) = current {
                if !self.changed_enough(current, sample) {
                    return FilterOutcome::Reject;
                }
            }
        }

        if let Some(v) = numeric_view(sample) {
            if !self.low_limit.is_nan() && v < self.low_limit {
                return FilterOutcome::Reject;
            }
            if !self.high_limit.is_nan() && v > self.high_limit {
                return FilterOutcome::Reject;
            }
        }

        if !self.json_extraction.is_empty() {
            if data_type != DataType::Json {
                return FilterOutcome::Reject;
            }
            return match sample.extract_json(&self.json_extraction) {
                Ok((extracted_type, extracted)) => {
                    FilterOutcome::Accept(extracted_type, extracted)
                }
                Err(e) => {
                    tracing::debug!("JSON extraction rejected sample: {}", e);
                    FilterOutcome::Reject
                }
            };
        }

        FilterOutcome::Accept(data_type, Rc::clone(sample))
    }

    /// Whether the new value differs enough from the current one.
    ///
    /// Numeric values must differ by at least `change_by`; other types must
    /// merely differ at all.
    fn changed_enough(&self, current: &Rc<DataSample>, sample: &Rc<DataSample>) -> bool {
        match (current.as_numeric(), sample.as_numeric()) {
            (Some(old), Some(new)) => (new - old).abs() >= self.change_by,
            _ => current.value() != sample.value(),
        }
    }

    /// Apply the configured transform to an accepted sample, using the
    /// buffered window plus the incoming value. The output keeps the
    /// incoming sample's timestamp.
    pub fn apply_transform(
        &self,
        data_type: DataType,
        sample: &Rc<DataSample>,
    ) -> (DataType, Rc<DataSample>) {
        if self.transform == TransformType::None {
            return (data_type, Rc::clone(sample));
        }

        let mut values: Vec<f64> = self
            .buffer
            .iter()
            .filter_map(|s| s.as_numeric())
            .collect();
        if let Some(v) = sample.as_numeric() {
            values.push(v);
        }

        let out = match self.transform {
            TransformType::None => unreachable!(),
            TransformType::Mean => mean(&values),
            TransformType::StdDev => std_dev(&values),
            TransformType::Min => values.iter().copied().fold(f64::NAN, f64::min),
            TransformType::Max => values.iter().copied().fold(f64::NAN, f64::max),
        };

        (
            DataType::Numeric,
            DataSample::numeric(sample.timestamp(), out),
        )
    }

    /// Append an accepted sample to the circular buffer, evicting the
    /// oldest when full. A capacity of 0 disables retention.
    pub fn buffer_append(&mut self, data_type: DataType, sample: Rc<DataSample>) {
        if self.buffer_max == 0 {
            return;
        }
        if data_type != self.buffer_type {
            // Type changed: the old window no longer describes this stream.
            self.buffer.clear();
            self.buffer_type = data_type;
        }
        while self.buffer.len() >= self.buffer_max as usize {
            self.buffer.pop_front();
        }
        self.buffer.push_back(sample);
        self.backup_dirty = true;
    }

    /// Change the buffer capacity, evicting oldest samples if shrinking.
    pub fn set_buffer_max(&mut self, count: u32) {
        self.buffer_max = count;
        while self.buffer.len() > count as usize {
            self.buffer.pop_front();
        }
    }

    /// The oldest buffered sample newer than the given resolved timestamp.
    pub fn find_sample_after(&self, threshold: f64) -> Option<&Rc<DataSample>> {
        self.buffer.iter().find(|s| s.timestamp() > threshold)
    }

    /// Buffered samples newer than the given resolved timestamp.
    pub fn samples_after(&self, threshold: f64) -> impl Iterator<Item = &Rc<DataSample>> {
        self.buffer.iter().filter(move |s| s.timestamp() > threshold)
    }

    fn window_values(&self, threshold: f64) -> Vec<f64> {
        self.samples_after(threshold)
            .filter_map(|s| s.as_numeric())
            .collect()
    }

    pub fn query_min(&self, threshold: f64) -> f64 {
        self.window_values(threshold)
            .into_iter()
            .fold(f64::NAN, f64::min)
    }

    pub fn query_max(&self, threshold: f64) -> f64 {
        self.window_values(threshold)
            .into_iter()
            .fold(f64::NAN, f64::max)
    }

    pub fn query_mean(&self, threshold: f64) -> f64 {
        mean(&self.window_values(threshold))
    }

    pub fn query_std_dev(&self, threshold: f64) -> f64 {
        std_dev(&self.window_values(threshold))
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Numeric view of a sample for limit filtering: numerics as themselves,
/// Booleans as 0/1, everything else exempt.
fn numeric_view(sample: &Rc<DataSample>) -> Option<f64> {
    match sample.as_numeric() {
        Some(v) => Some(v),
        None => sample.as_bool().map(|b| if b { 1.0 } else { 0.0 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept(outcome: FilterOutcome) -> Option<(DataType, Rc<DataSample>)> {
        match outcome {
            FilterOutcome::Accept(dt, s) => Some((dt, s)),
            FilterOutcome::Reject => None,
        }
    }

    #[test]
    fn test_min_period() {
        let mut obs = ObservationBody::new();
        obs.min_period = 10.0;
        obs.last_accepted_ts = Some(100.0);

        let early = DataSample::numeric(105.0, 1.0);
        assert!(accept(obs.filter(None, DataType::Numeric, &early)).is_none());

        let late = DataSample::numeric(110.0, 1.0);
        assert!(accept(obs.filter(None, DataType::Numeric, &late)).is_some());
    }

    #[test]
    fn test_change_by_numeric() {
        let mut obs = ObservationBody::new();
        obs.change_by = 0.5;

        let current = DataSample::numeric(1.0, 10.0);
        let close = DataSample::numeric(2.0, 10.2);
        let far = DataSample::numeric(3.0, 10.7);

        assert!(accept(obs.filter(Some(&current), DataType::Numeric, &close)).is_none());
        assert!(accept(obs.filter(Some(&current), DataType::Numeric, &far)).is_some());
        // No current value yet: everything passes.
        assert!(accept(obs.filter(None, DataType::Numeric, &close)).is_some());
    }

    #[test]
    fn test_change_by_non_numeric_equality() {
        let mut obs = ObservationBody::new();
        obs.change_by = 1.0;

        let current = DataSample::string(1.0, "on").unwrap();
        let same = DataSample::string(2.0, "on").unwrap();
        let different = DataSample::string(3.0, "off").unwrap();

        assert!(accept(obs.filter(Some(&current), DataType::String, &same)).is_none());
        assert!(accept(obs.filter(Some(&current), DataType::String, &different)).is_some());
    }

    #[test]
    fn test_limits() {
        let mut obs = ObservationBody::new();
        obs.low_limit = 0.0;
        obs.high_limit = 100.0;

        let low = DataSample::numeric(1.0, -5.0);
        let mid = DataSample::numeric(2.0, 50.0);
        let high = DataSample::numeric(3.0, 101.0);

        assert!(accept(obs.filter(None, DataType::Numeric, &low)).is_none());
        assert!(accept(obs.filter(None, DataType::Numeric, &mid)).is_some());
        assert!(accept(obs.filter(None, DataType::Numeric, &high)).is_none());

        // Booleans are treated as 0/1 against limits.
        obs.low_limit = 0.5;
        let off = DataSample::boolean(4.0, false);
        let on = DataSample::boolean(5.0, true);
        assert!(accept(obs.filter(None, DataType::Boolean, &off)).is_none());
        assert!(accept(obs.filter(None, DataType::Boolean, &on)).is_some());
    }

    #[test]
    fn test_json_extraction_filter() {
        let mut obs = ObservationBody::new();
        obs.json_extraction = "x.y".to_string();

        let json = DataSample::json(1000.0, "{\"x\":{\"y\":3}}").unwrap();
        let (dt, extracted) = accept(obs.filter(None, DataType::Json, &json)).unwrap();
        assert_eq!(dt, DataType::Numeric);
        assert_eq!(extracted.as_numeric(), Some(3.0));
        assert_eq!(extracted.timestamp(), 1000.0);

        // Non-JSON data is ignored while an extraction spec is set.
        let numeric = DataSample::numeric(1.0, 5.0);
        assert!(accept(obs.filter(None, DataType::Numeric, &numeric)).is_none());

        // JSON without the member is ignored too.
        let other = DataSample::json(2.0, "{\"a\":1}").unwrap();
        assert!(accept(obs.filter(None, DataType::Json, &other)).is_none());
    }

    #[test]
    fn test_buffer_fifo_eviction() {
        let mut obs = ObservationBody::new();
        obs.set_buffer_max(3);

        for i in 0..5 {
            obs.buffer_append(DataType::Numeric, DataSample::numeric(i as f64, i as f64));
        }

        let values: Vec<f64> = obs.buffer.iter().filter_map(|s| s.as_numeric()).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_buffer_zero_capacity() {
        let mut obs = ObservationBody::new();
        obs.buffer_append(DataType::Numeric, DataSample::numeric(1.0, 1.0));
        assert!(obs.buffer.is_empty());
        assert!(!obs.backup_dirty);
    }

    #[test]
    fn test_buffer_shrink() {
        let mut obs = ObservationBody::new();
        obs.set_buffer_max(4);
        for i in 0..4 {
            obs.buffer_append(DataType::Numeric, DataSample::numeric(i as f64, i as f64));
        }
        obs.set_buffer_max(2);
        let values: Vec<f64> = obs.buffer.iter().filter_map(|s| s.as_numeric()).collect();
        assert_eq!(values, vec![2.0, 3.0]);
    }

    #[test]
    fn test_transform_mean() {
        let mut obs = ObservationBody::new();
        obs.set_buffer_max(8);
        obs.transform = TransformType::Mean;
        obs.buffer_append(DataType::Numeric, DataSample::numeric(1.0, 10.0));
        obs.buffer_append(DataType::Numeric, DataSample::numeric(2.0, 20.0));

        let incoming = DataSample::numeric(3.0, 30.0);
        let (dt, out) = obs.apply_transform(DataType::Numeric, &incoming);
        assert_eq!(dt, DataType::Numeric);
        assert_eq!(out.as_numeric(), Some(20.0));
        assert_eq!(out.timestamp(), 3.0);
    }

    #[test]
    fn test_transform_min_max_stddev() {
        let mut obs = ObservationBody::new();
        obs.set_buffer_max(8);
        obs.buffer_append(DataType::Numeric, DataSample::numeric(1.0, 2.0));
        obs.buffer_append(DataType::Numeric, DataSample::numeric(2.0, 4.0));
        let incoming = DataSample::numeric(3.0, 6.0);

        obs.transform = TransformType::Min;
        assert_eq!(
            obs.apply_transform(DataType::Numeric, &incoming)
                .1
                .as_numeric(),
            Some(2.0)
        );

        obs.transform = TransformType::Max;
        assert_eq!(
            obs.apply_transform(DataType::Numeric, &incoming)
                .1
                .as_numeric(),
            Some(6.0)
        );

        obs.transform = TransformType::StdDev;
        let sd = obs
            .apply_transform(DataType::Numeric, &incoming)
            .1
            .as_numeric()
            .unwrap();
        // Population std dev of {2, 4, 6}.
        assert!((sd - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_queries() {
        let mut obs = ObservationBody::new();
        obs.set_buffer_max(8);
        for (ts, v) in [(10.0, 1.0), (20.0, 5.0), (30.0, 3.0)] {
            obs.buffer_append(DataType::Numeric, DataSample::numeric(ts, v));
        }

        assert_eq!(obs.query_min(f64::NEG_INFINITY), 1.0);
        assert_eq!(obs.query_max(f64::NEG_INFINITY), 5.0);
        assert_eq!(obs.query_mean(f64::NEG_INFINITY), 3.0);
        // Only samples newer than ts=15 count.
        assert_eq!(obs.query_min(15.0), 3.0);
        // Empty window yields NaN.
        assert!(obs.query_mean(100.0).is_nan());
    }

    #[test]
    fn test_queries_non_numeric_are_nan() {
        let mut obs = ObservationBody::new();
        obs.set_buffer_max(4);
        obs.buffer_append(
            DataType::String,
            DataSample::string(1.0, "abc").unwrap(),
        );
        assert!(obs.query_mean(f64::NEG_INFINITY).is_nan());
        assert!(obs.query_min(f64::NEG_INFINITY).is_nan());
    }

    #[test]
    fn test_find_sample_after() {
        let mut obs = ObservationBody::new();
        obs.set_buffer_max(4);
        for ts in [10.0, 20.0, 30.0] {
            obs.buffer_append(DataType::Numeric, DataSample::numeric(ts, ts));
        }
        assert_eq!(
            obs.find_sample_after(15.0).map(|s| s.timestamp()),
            Some(20.0)
        );
        assert!(obs.find_sample_after(30.0).is_none());
    }
}
