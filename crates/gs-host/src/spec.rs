//! A host's static topology, loadable from YAML, in the same spirit as
//! this workspace's existing pipeline-spec idiom.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSpec {
    pub name: String,
    pub own_topic: String,
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    pub broker: BrokerSpec,
}

fn default_partitions() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BrokerSpec {
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "kafka")]
    Kafka { brokers: String, group_id: String },
}

impl HostSpec {
    pub fn from_yaml(yaml: &str) -> Result<Self, crate::error::HostError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_memory_broker_spec() {
        let yaml = r#"
name: guess-number
own_topic: env-stream
broker:
  type: memory
"#;
        let spec = HostSpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.name, "guess-number");
        assert_eq!(spec.partitions, 1);
        assert!(matches!(spec.broker, BrokerSpec::Memory));
    }

    #[test]
    fn parses_kafka_broker_spec() {
        let yaml = r#"
name: env-host
own_topic: env-stream
partitions: 4
broker:
  type: kafka
  brokers: "localhost:9092"
  group_id: "env-group"
"#;
        let spec = HostSpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.partitions, 4);
        assert!(matches!(spec.broker, BrokerSpec::Kafka { .. }));
    }
}
