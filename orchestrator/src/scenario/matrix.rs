//! Scenario parameter matrix

use std::time::Duration;

use serde::Serialize;

use crate::inventory::ProtocolFamily;
use crate::load::Workload;

/// Lists of values a suite is parametrized over
///
/// `obj_sizes`/`out_files` and `writers`/`readers`/`deleters` are zipped
/// (truncating to the shortest list); every other list multiplies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioMatrix {
    pub obj_sizes: Vec<u64>,
    pub out_files: Vec<String>,
    pub writers: Vec<u32>,
    pub readers: Vec<u32>,
    pub deleters: Vec<u32>,
    pub load_times: Vec<Duration>,
    pub node_counts: Vec<usize>,
    pub containers_counts: Vec<u32>,
    pub load_types: Vec<ProtocolFamily>,
    pub obj_counts: Vec<u32>,
    pub load_nodes_counts: Vec<usize>,
}

impl Default for ScenarioMatrix {
    fn default() -> Self {
        Self {
            obj_sizes: vec![1000],
            out_files: vec!["1mb_200.json".to_string()],
            writers: vec![200],
            readers: vec![0],
            deleters: vec![0],
            load_times: vec![Duration::from_secs(200)],
            node_counts: vec![4],
            containers_counts: vec![1],
            load_types: vec![ProtocolFamily::Grpc],
            obj_counts: vec![4],
            load_nodes_counts: vec![1],
        }
    }
}

/// One fully parametrized scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioSpec {
    /// Storage nodes kept running
    pub node_count: usize,
    /// Load nodes taken from the front of the configured list
    pub load_nodes_count: usize,
    pub load_type: ProtocolFamily,
    pub obj_size: u64,
    pub out_file: String,
    pub writers: u32,
    pub readers: u32,
    pub deleters: u32,
    #[serde(rename = "load_time_secs", serialize_with = "as_secs")]
    pub load_time: Duration,
    pub containers_count: u32,
    pub obj_count: u32,
}

impl ScenarioSpec {
    pub fn title(&self) -> String {
        format!(
            "Load test - node_count = {}, writers = {} readers = {}, deleters = {}, obj_size = {}, load_time = {}",
            self.node_count,
            self.writers,
            self.readers,
            self.deleters,
            self.obj_size,
            self.load_time.as_secs()
        )
    }

    pub fn workload(&self) -> Workload {
        Workload {
            obj_size: self.obj_size,
            containers_count: self.containers_count,
            obj_count: self.obj_count,
            writers: self.writers,
            readers: self.readers,
            deleters: self.deleters,
            load_time: self.load_time,
            out_file: self.out_file.clone(),
            load_type: self.load_type,
        }
    }
}

impl ScenarioMatrix {
    /// Number of scenarios `expand` yields
    pub fn len(&self) -> usize {
        self.sizes().count()
            * self.workers().count()
            * self.load_times.len()
            * self.node_counts.len()
            * self.containers_counts.len()
            * self.load_types.len()
            * self.obj_counts.len()
            * self.load_nodes_counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every scenario of the suite, in a stable order
    pub fn expand(&self) -> Vec<ScenarioSpec> {
        let mut specs = Vec::with_capacity(self.len());
        for (obj_size, out_file) in self.sizes() {
            for (writers, readers, deleters) in self.workers() {
                for &load_time in &self.load_times {
                    for &node_count in &self.node_counts {
                        for &containers_count in &self.containers_counts {
                            for &load_type in &self.load_types {
                                for &obj_count in &self.obj_counts {
                                    for &load_nodes_count in &self.load_nodes_counts {
                                        specs.push(ScenarioSpec {
                                            node_count,
                                            load_nodes_count,
                                            load_type,
                                            obj_size,
                                            out_file: out_file.to_string(),
                                            writers,
                                            readers,
                                            deleters,
                                            load_time,
                                            containers_count,
                                            obj_count,
                                        });
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        specs
    }

    fn sizes(&self) -> impl Iterator<Item = (u64, &str)> {
        self.obj_sizes
            .iter()
            .copied()
            .zip(self.out_files.iter().map(String::as_str))
    }

    fn workers(&self) -> impl Iterator<Item = (u32, u32, u32)> + '_ {
        self.writers
            .iter()
            .zip(&self.readers)
            .zip(&self.deleters)
            .map(|((&w, &r), &d)| (w, r, d))
    }
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}
