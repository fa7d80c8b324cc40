//! Parameters injected into a simulation run

use serde::{Deserialize, Serialize};

/// A block parameter, addressed as `<model>/<subsystem>/<block>/<parameter>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockParam {
    pub path: String,
    pub value: f64,
}

impl BlockParam {
    pub fn new(path: impl Into<String>, value: f64) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }

    /// Block path and parameter name
    ///
    /// Parameter names don't always match the graphical block mask; the last
    /// path segment is taken verbatim.
    pub fn split(&self) -> (&str, &str) {
        match self.path.rsplit_once('/') {
            Some((block, parameter)) => (block, parameter),
            None => ("", self.path.as_str()),
        }
    }
}

/// Everything a simulation engine injects before starting a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationParameters {
    /// Model parameters, e.g. `StopTime`
    #[serde(default)]
    pub model: Vec<(String, f64)>,
    /// Model workspace variables
    #[serde(default)]
    pub workspace: Vec<(String, f64)>,
    /// Block parameters
    #[serde(default)]
    pub blocks: Vec<BlockParam>,
}

impl SimulationParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a model parameter, replacing an earlier value of the same name
    pub fn set_model_parameter(&mut self, name: impl Into<String>, value: f64) -> &mut Self {
        upsert(&mut self.model, name.into(), value);
        self
    }

    /// Set a workspace variable, replacing an earlier value of the same name
    pub fn set_workspace_variable(&mut self, name: impl Into<String>, value: f64) -> &mut Self {
        upsert(&mut self.workspace, name.into(), value);
        self
    }

    /// Set a block parameter, replacing an earlier value of the same path
    pub fn set_block_parameter(&mut self, path: impl Into<String>, value: f64) -> &mut Self {
        let path = path.into();
        match self.blocks.iter_mut().find(|p| p.path == path) {
            Some(param) => param.value = value,
            None => self.blocks.push(BlockParam { path, value }),
        }
        self
    }

    pub fn model_parameter(&self, name: &str) -> Option<f64> {
        lookup(&self.model, name)
    }

    pub fn workspace_variable(&self, name: &str) -> Option<f64> {
        lookup(&self.workspace, name)
    }

    pub fn block_parameter(&self, path: &str) -> Option<f64> {
        self.blocks.iter().find(|p| p.path == path).map(|p| p.value)
    }
}

fn upsert(entries: &mut Vec<(String, f64)>, name: String, value: f64) {
    match entries.iter_mut().find(|(n, _)| *n == name) {
        Some(entry) => entry.1 = value,
        None => entries.push((name, value)),
    }
}

fn lookup(entries: &[(String, f64)], name: &str) -> Option<f64> {
    entries.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
}
