//! The automation target the interpreter drives.
//!
//! Any object implementing [`Actuator`] is enough to run a script; the
//! interpreter never depends on a concrete browser.

use crate::model::Locator;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// A located element.
#[async_trait]
pub trait ElementHandle: Send + Sync {
    async fn click(&self) -> Result<()>;

    async fn send_keys(&self, text: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    async fn text(&self) -> Result<String>;

    async fn attribute(&self, name: &str) -> Result<Option<String>>;

    async fn is_displayed(&self) -> Result<bool>;

    async fn is_enabled(&self) -> Result<bool>;

    async fn css_value(&self, property: &str) -> Result<String>;

    async fn rect(&self) -> Result<Rect>;
}

#[async_trait]
pub trait Actuator: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn find_elements(&self, locator: &Locator) -> Result<Vec<Box<dyn ElementHandle>>>;

    /// First element matching `locator`; an error when there is none.
    async fn find_element(&self, locator: &Locator) -> Result<Box<dyn ElementHandle>> {
        self.find_elements(locator)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no element matches {locator}"))
    }

    async fn execute_script(&self, script: &str) -> Result<Value>;
}

/// Render a script result the way getters compare it.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
