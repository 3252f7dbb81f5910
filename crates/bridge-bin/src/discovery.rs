//! Home Assistant MQTT discovery for bridged mowers.

use async_trait::async_trait;
use bridge_relay::{BrokerClient, DiscoveryAnnouncer, RelayResult};
use bytes::Bytes;
use cloud_auth::Device;
use rumqttc::QoS;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

const ACTIVITY_TEMPLATE: &str = r#"{%- set status_map = {
  1: "docked",
  2: "mowing", 3: "mowing", 7: "mowing", 32: "mowing", 33: "mowing",
  4: "returning", 5: "returning", 6: "returning", 30: "returning",
  8: "error", 9: "error", 10: "error", 12: "error",
  0: "paused", 11: "paused", 31: "paused", 34: "paused"
} -%}
{{- status_map[value_json.dat.ls] | default("unknown") -}}"#;

const STATUS_TEMPLATE: &str = r#"{%- set status_map = {
  0: "Idle", 1: "Home", 2: "Start sequence", 3: "Leaving home",
  4: "Follow wire", 5: "Searching home", 6: "Searching wire", 7: "Mowing",
  8: "Lifted", 9: "Trapped", 10: "Blade blocked", 11: "Debug",
  12: "Remote control", 30: "Going home", 31: "Zone training",
  32: "Border Cut", 33: "Searching zone", 34: "Pause" } -%}
{{- status_map[value_json.dat.ls] | default("unknown") -}}"#;

const STATUS_ATTRIBUTES_TEMPLATE: &str = r#"{%- set j = value_json -%}
{%- set ns = namespace(attrs={}) -%}
{%- set attr_map = {
  'last_update_time': j.cfg.tm, 'last_update_date': j.cfg.dt,
  'schedule_active': j.cfg.sc.m, 'schedule_variation': j.cfg.sc.p,
  'schedule_days': j.cfg.sc.d, 'rain_delay': j.cfg.rd,
  'serial_number': j.cfg.sn, 'mac_address': j.dat.mac, 'firmware': j.dat.fw,
  'battery_temperature': j.dat.bt.t, 'battery_voltage': j.dat.bt.v,
  'battery_charge_percent': j.dat.bt.p, 'battery_charge_cycles': j.dat.bt.nr,
  'battery_charging': j.dat.bt.c,
  'roll': j.dat.dmp[0], 'yaw': j.dat.dmp[1], 'pitch': j.dat.dmp[2],
  'status_code': j.dat.ls, 'error_code': j.dat.le, 'zone_current': j.dat.lz,
  'zone_mz': j.cfg.mz, 'zone_mzv': j.cfg.mzv,
  'wifi_link_quality': j.dat.rsi } -%}
{%- for key, value in attr_map.items() -%}
  {%- if value is defined -%}
    {%- set ns.attrs = dict(ns.attrs, **{key: value}) -%}
  {%- endif -%}
{%- endfor -%}
{%- if j.dat.st.b is defined -%}
  {%- set t = j.dat.st.b -%}
  {%- set ns.attrs = dict(ns.attrs, **{'blade_time': '%0dd %0.02dh %0.02dmin' | format(t // 1440, ((t % 1440) // 60), t % 60)}) -%}
{%- endif -%}
{%- if j.dat.st.wt is defined -%}
  {%- set t = j.dat.st.wt -%}
  {%- set ns.attrs = dict(ns.attrs, **{'mowing_time': '%0dd %0.02dh %0.02dmin' | format(t // 1440, ((t % 1440) // 60), t % 60)}) -%}
{%- endif -%}
{%- if j.dat.st.d is defined -%}
  {%- set dist = (j.dat.st.d | float(0) / 1000) | int(0) | string + ' km' -%}
  {%- set ns.attrs = dict(ns.attrs, **{'driven_distance': dist}) -%}
{%- endif -%}
{{- ns.attrs | tojson -}}"#;

const ERROR_TEMPLATE: &str = r#"{%- set mapper = {
  0: "No errors", 1: "Trapped", 2: "Lifted", 3: "Wire missing",
  4: "Outside wire", 5: "Rain Delay", 6: "Close door to mow",
  7: "Close door to go home", 8: "Blade motor blocked",
  9: "Wheel motor blocked", 10: "Trapped timeout", 11: "Upside down",
  12: "Battery low", 13: "Reverse wire", 14: "Charge error",
  15: "Timeout finding home", 16: "Mower locked",
  17: "Battery temperature too high/low" } %}
{%- set state = value_json.dat.le | int(-1) -%}
{{- mapper[state] if state in mapper else 'Unknown: ' ~ state -}}"#;

/// One discovery config ready to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryEntity {
    pub component: &'static str,
    pub unique_id: String,
    pub config: Value,
}

/// Publishes retained discovery configs for every device.
pub struct HomeAssistantDiscovery {
    prefix: String,
    availability_topic: String,
    manufacturer: &'static str,
    qos: QoS,
}

impl HomeAssistantDiscovery {
    pub fn new(
        prefix: impl Into<String>,
        availability_topic: impl Into<String>,
        manufacturer: &'static str,
        qos: QoS,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            availability_topic: availability_topic.into(),
            manufacturer,
            qos,
        }
    }

    pub fn config_topic(&self, entity: &DiscoveryEntity) -> String {
        format!(
            "{}/{}/{}/config",
            self.prefix, entity.component, entity.unique_id
        )
    }

    /// Every entity announced for `device`.
    pub fn entities(&self, device: &Device) -> Vec<DiscoveryEntity> {
        let mac = &device.mac_address;
        let commands = &device.topics.inbound;

        let mut entities = vec![self.entity(
            device,
            "lawn_mower",
            format!("mower_{mac}"),
            json!({
                "name": "Lawn Mower",
                "activity_state_topic": device.topics.outbound,
                "activity_value_template": ACTIVITY_TEMPLATE,
                "dock_command_topic": commands,
                "dock_command_template": r#"{"cmd":3}"#,
                "pause_command_topic": commands,
                "pause_command_template": r#"{"cmd":2}"#,
                "start_mowing_command_topic": commands,
                "start_mowing_command_template": r#"{"cmd":1}"#,
            }),
        )];

        entities.push(self.entity(
            device,
            "switch",
            format!("wifi_lock_{mac}"),
            json!({
                "name": "Wi-Fi Lock",
                "ic": "mdi:lock-open",
                "val_tpl": "{{ 'ON' if value_json.dat.lk == 1 else 'OFF' }}",
                "cmd_t": commands,
                "cmd_tpl": r#"{% if value == "ON" %}{"cmd":5}{% else %}{"cmd":6}{% endif %}"#,
            }),
        ));

        let sensors = [
            (
                format!("mower_status_{mac}"),
                json!({
                    "name": "Status",
                    "ic": "mdi:robot-mower-outline",
                    "val_tpl": STATUS_TEMPLATE,
                    "json_attr_t": device.topics.outbound,
                    "json_attr_tpl": STATUS_ATTRIBUTES_TEMPLATE,
                }),
            ),
            (
                format!("mower_error_{mac}"),
                json!({
                    "name": "Error",
                    "ic": "mdi:alert-circle",
                    "val_tpl": ERROR_TEMPLATE,
                }),
            ),
            (
                format!("mower_battery_level_{mac}"),
                json!({
                    "name": "Battery Level",
                    "unit_of_meas": "%",
                    "dev_cla": "battery",
                    "val_tpl": "{{ value_json.dat.bt.p | int(0) }}",
                }),
            ),
            (
                format!("mower_battery_voltage_{mac}"),
                json!({
                    "name": "Battery Voltage",
                    "unit_of_meas": "V",
                    "dev_cla": "voltage",
                    "val_tpl": "{{ value_json.dat.bt.v | float(0) }}",
                    "ent_cat": "diagnostic",
                }),
            ),
            (
                format!("mower_battery_temperature_{mac}"),
                json!({
                    "name": "Battery Temperature",
                    "unit_of_meas": "°C",
                    "dev_cla": "temperature",
                    "val_tpl": "{{ value_json.dat.bt.t | float(0) }}",
                    "ent_cat": "diagnostic",
                }),
            ),
            (
                format!("mower_battery_cycles_{mac}"),
                json!({
                    "name": "Battery Cycles",
                    "ic": "mdi:battery-sync",
                    "val_tpl": "{{ value_json.dat.bt.nr | int(0) }}",
                    "ent_cat": "diagnostic",
                }),
            ),
            (
                format!("mower_wifi_{mac}"),
                json!({
                    "name": "WiFi Quality",
                    "unit_of_meas": "dBm",
                    "dev_cla": "signal_strength",
                    "val_tpl": "{{ value_json.dat.rsi | int(-100) }}",
                    "ent_cat": "diagnostic",
                }),
            ),
            (
                format!("mower_lastupdate_{mac}"),
                json!({
                    "name": "Last Update",
                    "ic": "mdi:clock",
                    "val_tpl": "{{ strptime(value_json.cfg.dt + ' ' + value_json.cfg.tm, '%d/%m/%Y %H:%M:%S').strftime('%d.%m.%y %H:%M') }}",
                }),
            ),
        ];
        for (unique_id, config) in sensors {
            entities.push(self.state_entity(device, "sensor", unique_id, config));
        }

        let binary_sensors = [
            (
                format!("mower_mowing_{mac}"),
                json!({
                    "name": "Mowing",
                    "dev_cla": "running",
                    "val_tpl": "{{ 'ON' if value_json.dat.ls == 7 else 'OFF' }}",
                    "ent_cat": "diagnostic",
                }),
            ),
            (
                format!("mower_battery_charging_{mac}"),
                json!({
                    "name": "Battery Charging",
                    "dev_cla": "battery_charging",
                    "val_tpl": "{{ 'ON' if value_json.dat.bt.c | int(0) == 1 else 'OFF' }}",
                    "ent_cat": "diagnostic",
                }),
            ),
        ];
        for (unique_id, config) in binary_sensors {
            entities.push(self.state_entity(device, "binary_sensor", unique_id, config));
        }

        entities
    }

    /// Entity reading its state from the device's status topic.
    fn state_entity(
        &self,
        device: &Device,
        component: &'static str,
        unique_id: String,
        mut config: Value,
    ) -> DiscoveryEntity {
        config["stat_t"] = json!(device.topics.outbound);
        self.entity(device, component, unique_id, config)
    }

    fn entity(
        &self,
        device: &Device,
        component: &'static str,
        unique_id: String,
        mut config: Value,
    ) -> DiscoveryEntity {
        config["uniq_id"] = json!(unique_id);
        config["avty_t"] = json!(self.availability_topic);
        config["dev"] = self.device_block(device);
        DiscoveryEntity {
            component,
            unique_id,
            config,
        }
    }

    fn device_block(&self, device: &Device) -> Value {
        let mut block = Map::new();
        block.insert("mf".into(), json!(self.manufacturer));
        block.insert("name".into(), json!(device.name));
        block.insert("ids".into(), json!([device.mac_address]));
        if let Some(model) = &device.model {
            block.insert("mdl".into(), json!(model.friendly_name));
            block.insert("mdl_id".into(), json!(model.code));
        }
        if let Some(firmware) = &device.firmware_version {
            block.insert("sw".into(), json!(firmware));
        }
        if let Some(serial) = &device.serial_number {
            block.insert("sn".into(), json!(serial));
        }
        Value::Object(block)
    }
}

#[async_trait]
impl DiscoveryAnnouncer for HomeAssistantDiscovery {
    async fn announce(&self, devices: &[Device], publisher: &dyn BrokerClient) -> RelayResult<()> {
        for device in devices {
            for entity in self.entities(device) {
                let topic = self.config_topic(&entity);
                let payload = Bytes::from(entity.config.to_string());
                match publisher.publish(&topic, self.qos, true, payload).await {
                    Ok(()) => debug!(topic = %topic, "Sent discovery config"),
                    Err(e) => warn!(topic = %topic, error = %e, "Failed to send discovery config"),
                }
            }
        }
        Ok(())
    }
}
