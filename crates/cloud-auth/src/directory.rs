//! Fleet directory: devices of the authenticated account.

use crate::{ApiRequest, ApiTransport, AuthResult, RestClient};
use bridge_config::BrandConfig;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

/// Broker topics of one device, as seen from the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTopics {
    /// Commands towards the device (`command_in`).
    #[serde(rename = "command_in")]
    pub inbound: String,
    /// Status reports from the device (`command_out`).
    #[serde(rename = "command_out")]
    pub outbound: String,
}

/// Model resolved from the product catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceModel {
    pub code: String,
    pub friendly_name: String,
}

/// Immutable snapshot of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub user_id: String,
    pub mac_address: String,
    pub name: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub serial_number: Option<String>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub firmware_version: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub product_id: String,
    /// Cloud broker host serving this device.
    pub mqtt_endpoint: String,
    #[serde(rename = "mqtt_topics")]
    pub topics: DeviceTopics,
    /// Filled from the catalog; `None` when the product is unknown.
    #[serde(skip_deserializing)]
    pub model: Option<DeviceModel>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    code: Option<String>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    default_name: Option<String>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    meters: Option<String>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    product_year: Option<String>,
}

impl CatalogEntry {
    fn model(&self) -> DeviceModel {
        DeviceModel {
            code: self.code.clone().unwrap_or_default(),
            friendly_name: format!(
                "{}{} {}",
                self.default_name.as_deref().unwrap_or_default(),
                self.meters.as_deref().unwrap_or_default(),
                self.product_year.as_deref().unwrap_or_default()
            )
            .trim()
            .to_string(),
        }
    }
}

/// Device list client. Joins product items with the model catalog on the
/// product id, keeping devices whose model is unknown.
pub struct FleetDirectory<T> {
    rest: RestClient<T>,
    items_url: Url,
    catalog_url: Url,
}

impl<T: ApiTransport> FleetDirectory<T> {
    pub fn new(rest: RestClient<T>, brand: &BrandConfig) -> AuthResult<Self> {
        Ok(Self {
            rest,
            items_url: brand.product_items_url()?,
            catalog_url: brand.products_url()?,
        })
    }

    /// Devices in the order the directory endpoint returned them.
    pub async fn list_devices(&self, access_token: &str) -> AuthResult<Vec<Device>> {
        let items = self
            .rest
            .request(ApiRequest::get(self.items_url.clone()).bearer(access_token))
            .await?;
        let mut devices: Vec<Device> = serde_json::from_value(array_or_empty(items))?;
        if devices.is_empty() {
            return Ok(devices);
        }

        let catalog = self
            .rest
            .request(ApiRequest::get(self.catalog_url.clone()).bearer(access_token))
            .await?;
        let catalog: Vec<CatalogEntry> = serde_json::from_value(array_or_empty(catalog))?;
        debug!(products = catalog.len(), "Fetched product catalog");

        for device in &mut devices {
            device.model = catalog
                .iter()
                .find(|entry| entry.id == device.product_id)
                .map(CatalogEntry::model);
            match &device.model {
                Some(model) => info!(
                    device = %device.name,
                    mac = %device.mac_address,
                    model = %model.friendly_name,
                    "Found mower"
                ),
                None => warn!(
                    device = %device.name,
                    product_id = %device.product_id,
                    "No catalog entry for product, model unknown"
                ),
            }
        }

        Ok(devices)
    }
}

fn array_or_empty(value: Value) -> Value {
    match value {
        Value::Null => Value::Array(Vec::new()),
        other => other,
    }
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_string(value).ok_or_else(|| serde::de::Error::custom("expected a string or number"))
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_string(Value::deserialize(deserializer)?))
}
