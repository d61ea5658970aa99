//! Automation-bus topic shapes and discovery payloads
//!
//! Lights are announced to the bus with retained per-light config payloads
//! (Home Assistant MQTT discovery shape); removal is a retained empty
//! payload on the same topic. State and command topics hang off the
//! configured prefix. Management traffic uses a single command/response
//! topic pair.

use serde_json::json;

use avion_core::AvionId;

/// Automation-bus client operations the hub depends on
///
/// Fire-and-forget: implementations queue I/O internally and never block
/// the control loop. Inbound subscription payloads are routed back through
/// the binary's channels, not through this trait.
pub trait AutomationBus: Send {
    /// Publish a payload
    fn publish(&mut self, topic: &str, payload: &str, retain: bool);

    /// Subscribe to a command topic
    fn subscribe(&mut self, topic: &str);
}

/// Builds topics and discovery payloads for one hub node
#[derive(Debug, Clone)]
pub struct BusDiscovery {
    node_name: String,
    topic_prefix: String,
}

impl BusDiscovery {
    /// Create a topic builder for the given node name and prefix
    pub fn new(node_name: impl Into<String>, topic_prefix: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            topic_prefix: topic_prefix.into(),
        }
    }

    /// On/off state topic for a light
    pub fn state_topic(&self, avion_id: AvionId) -> String {
        format!("{}/light/{}/state", self.topic_prefix, avion_id)
    }

    /// On/off command topic for a light
    pub fn command_topic(&self, avion_id: AvionId) -> String {
        format!("{}/light/{}/set", self.topic_prefix, avion_id)
    }

    /// Brightness state topic
    pub fn brightness_state_topic(&self, avion_id: AvionId) -> String {
        format!("{}/light/{}/brightness/state", self.topic_prefix, avion_id)
    }

    /// Brightness command topic
    pub fn brightness_command_topic(&self, avion_id: AvionId) -> String {
        format!("{}/light/{}/brightness/set", self.topic_prefix, avion_id)
    }

    /// Color-temperature state topic
    pub fn color_temp_state_topic(&self, avion_id: AvionId) -> String {
        format!("{}/light/{}/color_temp/state", self.topic_prefix, avion_id)
    }

    /// Color-temperature command topic
    pub fn color_temp_command_topic(&self, avion_id: AvionId) -> String {
        format!("{}/light/{}/color_temp/set", self.topic_prefix, avion_id)
    }

    /// Retained discovery config topic for a light
    pub fn discovery_topic(&self, avion_id: AvionId) -> String {
        format!("homeassistant/light/{}_{}/config", self.node_name, avion_id)
    }

    /// Management command topic for this node
    pub fn management_command_topic(&self) -> String {
        format!("{}/avionmesh/command", self.topic_prefix)
    }

    /// Management response topic for this node
    pub fn management_response_topic(&self) -> String {
        format!("{}/avionmesh/response", self.topic_prefix)
    }

    /// Announce a light with its capabilities
    pub fn publish_light(
        &self,
        bus: &mut dyn AutomationBus,
        avion_id: AvionId,
        name: &str,
        has_brightness: bool,
        has_color_temp: bool,
        product_name: Option<&str>,
    ) {
        let uid = format!("{}_{}", self.node_name, avion_id);

        let mut config = json!({
            "name": name,
            "unique_id": uid.clone(),
            "command_topic": self.command_topic(avion_id),
            "state_topic": self.state_topic(avion_id),
            "device": {
                "identifiers": [uid],
                "name": name,
                "manufacturer": "Avi-on",
                "via_device": self.node_name.clone(),
            },
        });

        if has_brightness {
            config["brightness_command_topic"] =
                json!(self.brightness_command_topic(avion_id));
            config["brightness_state_topic"] = json!(self.brightness_state_topic(avion_id));
            config["brightness_scale"] = json!(255);
        }
        if has_color_temp {
            config["supported_color_modes"] = json!(["color_temp"]);
            config["min_mireds"] = json!(200);
            config["max_mireds"] = json!(370);
            config["color_temp_command_topic"] =
                json!(self.color_temp_command_topic(avion_id));
            config["color_temp_state_topic"] = json!(self.color_temp_state_topic(avion_id));
        } else if has_brightness {
            config["supported_color_modes"] = json!(["brightness"]);
        }
        if let Some(model) = product_name {
            config["device"]["model"] = json!(model);
        }

        bus.publish(&self.discovery_topic(avion_id), &config.to_string(), true);
    }

    /// Retract a light's discovery config
    pub fn remove_light(&self, bus: &mut dyn AutomationBus, avion_id: AvionId) {
        bus.publish(&self.discovery_topic(avion_id), "", true);
    }

    /// Publish retained on/off state
    pub fn publish_on_off_state(&self, bus: &mut dyn AutomationBus, avion_id: AvionId, on: bool) {
        bus.publish(&self.state_topic(avion_id), if on { "ON" } else { "OFF" }, true);
    }

    /// Publish retained brightness state
    pub fn publish_brightness_state(
        &self,
        bus: &mut dyn AutomationBus,
        avion_id: AvionId,
        brightness: u8,
    ) {
        bus.publish(
            &self.brightness_state_topic(avion_id),
            &brightness.to_string(),
            true,
        );
    }

    /// Publish retained color-temperature state (kelvin converted to mireds)
    pub fn publish_color_temp_state(
        &self,
        bus: &mut dyn AutomationBus,
        avion_id: AvionId,
        kelvin: u16,
    ) {
        let mireds = if kelvin > 0 { 1_000_000 / kelvin as u32 } else { 0 };
        bus.publish(
            &self.color_temp_state_topic(avion_id),
            &mireds.to_string(),
            true,
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records publishes and subscriptions for assertions
    #[derive(Clone, Default)]
    pub struct MockBus {
        pub published: Arc<Mutex<Vec<(String, String, bool)>>>,
        pub subscribed: Arc<Mutex<Vec<String>>>,
    }

    impl MockBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn published_on(&self, topic: &str) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _, _)| t == topic)
                .map(|(_, p, _)| p.clone())
                .collect()
        }
    }

    impl AutomationBus for MockBus {
        fn publish(&mut self, topic: &str, payload: &str, retain: bool) {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_string(), retain));
        }

        fn subscribe(&mut self, topic: &str) {
            self.subscribed.lock().unwrap().push(topic.to_string());
        }
    }

    fn discovery() -> BusDiscovery {
        BusDiscovery::new("hub1", "avion")
    }

    #[test]
    fn test_topic_shapes() {
        let d = discovery();
        assert_eq!(d.state_topic(33000), "avion/light/33000/state");
        assert_eq!(d.command_topic(33000), "avion/light/33000/set");
        assert_eq!(
            d.brightness_command_topic(33000),
            "avion/light/33000/brightness/set"
        );
        assert_eq!(
            d.discovery_topic(33000),
            "homeassistant/light/hub1_33000/config"
        );
        assert_eq!(d.management_command_topic(), "avion/avionmesh/command");
        assert_eq!(d.management_response_topic(), "avion/avionmesh/response");
    }

    #[test]
    fn test_light_config_payload() {
        let d = discovery();
        let mut bus = MockBus::new();
        d.publish_light(&mut bus, 33000, "Kitchen", true, true, Some("Halo 4in Downlight"));

        let published = bus.published.lock().unwrap();
        let (topic, payload, retain) = &published[0];
        assert_eq!(topic, "homeassistant/light/hub1_33000/config");
        assert!(*retain);

        let config: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(config["name"], "Kitchen");
        assert_eq!(config["unique_id"], "hub1_33000");
        assert_eq!(config["brightness_scale"], 255);
        assert_eq!(config["supported_color_modes"][0], "color_temp");
        assert_eq!(config["min_mireds"], 200);
        assert_eq!(config["device"]["manufacturer"], "Avi-on");
        assert_eq!(config["device"]["model"], "Halo 4in Downlight");
    }

    #[test]
    fn test_dimmer_without_color_temp() {
        let d = discovery();
        let mut bus = MockBus::new();
        d.publish_light(&mut bus, 33001, "Hall", true, false, None);

        let published = bus.published.lock().unwrap();
        let config: serde_json::Value = serde_json::from_str(&published[0].1).unwrap();
        assert_eq!(config["supported_color_modes"][0], "brightness");
        assert!(config.get("color_temp_command_topic").is_none());
    }

    #[test]
    fn test_remove_light_retained_empty() {
        let d = discovery();
        let mut bus = MockBus::new();
        d.remove_light(&mut bus, 33000);

        let published = bus.published.lock().unwrap();
        assert_eq!(
            published[0],
            (
                "homeassistant/light/hub1_33000/config".to_string(),
                String::new(),
                true
            )
        );
    }

    #[test]
    fn test_color_temp_state_converts_to_mireds() {
        let d = discovery();
        let mut bus = MockBus::new();
        d.publish_color_temp_state(&mut bus, 33000, 4000);

        assert_eq!(
            bus.published_on("avion/light/33000/color_temp/state"),
            vec!["250".to_string()]
        );
    }

    #[test]
    fn test_on_off_state() {
        let d = discovery();
        let mut bus = MockBus::new();
        d.publish_on_off_state(&mut bus, 33000, true);
        d.publish_on_off_state(&mut bus, 33000, false);

        assert_eq!(
            bus.published_on("avion/light/33000/state"),
            vec!["ON".to_string(), "OFF".to_string()]
        );
    }
}
