//! Test data builders for wiring up hubs

use datahub_rs::{AdminService, DataType, Hub, IoService};

/// Builder for a hub with one client input and one observation routed to it.
pub struct ObservedInputBuilder {
    client: String,
    input_path: String,
    observation: String,
    data_type: DataType,
    units: String,
    buffer_max: u32,
    change_by: Option<f64>,
    min_period: Option<f64>,
    json_extraction: Option<String>,
}

impl ObservedInputBuilder {
    pub fn new(observation: &str) -> Self {
        Self {
            client: "sensor".to_string(),
            input_path: "value".to_string(),
            observation: observation.to_string(),
            data_type: DataType::Numeric,
            units: String::new(),
            buffer_max: 16,
            change_by: None,
            min_period: None,
            json_extraction: None,
        }
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn units(mut self, units: &str) -> Self {
        self.units = units.to_string();
        self
    }

    pub fn buffer_max(mut self, count: u32) -> Self {
        self.buffer_max = count;
        self
    }

    pub fn change_by(mut self, change: f64) -> Self {
        self.change_by = Some(change);
        self
    }

    pub fn min_period(mut self, period: f64) -> Self {
        self.min_period = Some(period);
        self
    }

    pub fn json_extraction(mut self, spec: &str) -> Self {
        self.json_extraction = Some(spec.to_string());
        self
    }

    /// Build the hub. Returns it along with the input's absolute path and
    /// the observation's absolute path.
    pub fn build(self) -> (Hub, String, String) {
        let mut hub = Hub::default();
        {
            let mut io = IoService::new(&mut hub, &self.client).unwrap();
            io.create_input(&self.input_path, self.data_type, &self.units)
                .unwrap();
        }
        let input_abs = format!("/app/{}/{}", self.client, self.input_path);
        let obs_abs = format!("/obs/{}", self.observation);
        {
            let mut admin = AdminService::new(&mut hub);
            admin.create_observation(&self.observation).unwrap();
            admin
                .set_buffer_max_count(&self.observation, self.buffer_max)
                .unwrap();
            if let Some(change) = self.change_by {
                admin.set_change_by(&self.observation, change).unwrap();
            }
            if let Some(period) = self.min_period {
                admin.set_min_period(&self.observation, period).unwrap();
            }
            if let Some(spec) = &self.json_extraction {
                admin.set_json_extraction(&self.observation, spec).unwrap();
            }
            admin
                .set_source(&self.observation, Some(&input_abs))
                .unwrap();
        }
        (hub, input_abs, obs_abs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observed_input_builder() {
        let (hub, input, obs) = ObservedInputBuilder::new("o1")
            .units("degC")
            .buffer_max(4)
            .build();
        assert_eq!(input, "/app/sensor/value");
        assert_eq!(obs, "/obs/o1");
        assert!(hub.find_absolute(&input).is_some());
        assert!(hub.find_absolute(&obs).is_some());
    }
}
