//! In-memory actuator for unit tests.

use crate::actuator::{Actuator, ElementHandle, Rect};
use crate::model::Locator;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeElement {
    pub text: String,
    pub displayed: bool,
    pub enabled: bool,
    pub rect: Rect,
    pub attributes: HashMap<String, String>,
    pub css: HashMap<String, String>,
    pub clicks: usize,
}

impl FakeElement {
    /// Displayed, enabled and 10x10.
    pub fn visible(text: &str) -> Self {
        Self {
            text: text.to_string(),
            displayed: true,
            enabled: true,
            rect: Rect {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
            },
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeActuator {
    elements: Mutex<HashMap<Locator, Arc<Mutex<FakeElement>>>>,
    scripts: Mutex<HashMap<String, VecDeque<Value>>>,
    pub navigations: Mutex<Vec<String>>,
}

impl FakeActuator {
    pub fn with_element(self, locator: Locator, element: FakeElement) -> Self {
        self.elements
            .lock()
            .unwrap()
            .insert(locator, Arc::new(Mutex::new(element)));
        self
    }

    /// Results returned by successive runs of `script`; the last repeats.
    pub fn with_script(self, script: &str, results: Vec<Value>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(script.to_string(), results.into());
        self
    }

    pub fn element(&self, locator: &Locator) -> Option<FakeElement> {
        self.elements
            .lock()
            .unwrap()
            .get(locator)
            .map(|e| e.lock().unwrap().clone())
    }
}

struct FakeHandle(Arc<Mutex<FakeElement>>);

#[async_trait]
impl ElementHandle for FakeHandle {
    async fn click(&self) -> Result<()> {
        self.0.lock().unwrap().clicks += 1;
        Ok(())
    }

    async fn send_keys(&self, text: &str) -> Result<()> {
        self.0.lock().unwrap().text.push_str(text);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.0.lock().unwrap().text.clear();
        Ok(())
    }

    async fn text(&self) -> Result<String> {
        Ok(self.0.lock().unwrap().text.clone())
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        Ok(self.0.lock().unwrap().attributes.get(name).cloned())
    }

    async fn is_displayed(&self) -> Result<bool> {
        Ok(self.0.lock().unwrap().displayed)
    }

    async fn is_enabled(&self) -> Result<bool> {
        Ok(self.0.lock().unwrap().enabled)
    }

    async fn css_value(&self, property: &str) -> Result<String> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .css
            .get(property)
            .cloned()
            .unwrap_or_default())
    }

    async fn rect(&self) -> Result<Rect> {
        Ok(self.0.lock().unwrap().rect)
    }
}

#[async_trait]
impl Actuator for FakeActuator {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.navigations.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn find_elements(&self, locator: &Locator) -> Result<Vec<Box<dyn ElementHandle>>> {
        Ok(self
            .elements
            .lock()
            .unwrap()
            .get(locator)
            .map(|e| vec![Box::new(FakeHandle(Arc::clone(e))) as Box<dyn ElementHandle>])
            .unwrap_or_default())
    }

    async fn execute_script(&self, script: &str) -> Result<Value> {
        let mut scripts = self.scripts.lock().unwrap();
        let Some(queue) = scripts.get_mut(script) else {
            return Ok(Value::Null);
        };
        if queue.len() > 1 {
            return Ok(queue.pop_front().unwrap_or_default());
        }
        Ok(queue.front().cloned().unwrap_or_default())
    }
}
