//! Static feeder topology: buses, branches, loads and the breaker-gated line.
//!
//! Loaded once at startup and validated before the cycle loop starts. The only
//! thing that varies afterwards is the in-service flag of the line the breaker
//! controls, and that is decided per solve, never written back here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Customer class a load belongs to. Drives which diurnal profile scales it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerClass {
    Industrial,
    Commercial,
    Residential,
}

impl CustomerClass {
    pub const ALL: [CustomerClass; 3] = [
        CustomerClass::Industrial,
        CustomerClass::Commercial,
        CustomerClass::Residential,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum BusKind {
    /// Swing bus held at a fixed voltage by the upstream grid.
    Slack { vm_pu: f64 },
    /// Plain load bus.
    Pq,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusSpec {
    pub id: String,
    /// Nominal line-to-line voltage in kV.
    pub vn_kv: f64,
    #[serde(flatten)]
    pub kind: BusKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum BranchKind {
    Line {
        r_ohm_per_km: f64,
        x_ohm_per_km: f64,
        length_km: f64,
        /// Thermal rating in kA.
        max_i_ka: f64,
    },
    Transformer {
        sn_mva: f64,
        vk_percent: f64,
        vkr_percent: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchSpec {
    pub id: String,
    pub from_bus: String,
    pub to_bus: String,
    #[serde(flatten)]
    pub kind: BranchKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSpec {
    pub id: String,
    pub bus: String,
    pub class: CustomerClass,
    /// Nominal active power draw in MW; rescaled per cycle by the class total.
    pub p_mw: f64,
    pub q_mvar: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSpec {
    /// Id of the line this breaker gates.
    pub controls: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridTopology {
    #[serde(default = "default_s_base")]
    pub s_base_mva: f64,
    pub buses: Vec<BusSpec>,
    pub branches: Vec<BranchSpec>,
    pub loads: Vec<LoadSpec>,
    pub breaker: BreakerSpec,
    /// Bus where distributed generation injects; omit to model a pure load feeder.
    #[serde(default)]
    pub generation_bus: Option<String>,
}

fn default_s_base() -> f64 {
    1.0
}

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("duplicate id `{0}`")]
    DuplicateId(String),
    #[error("branch `{branch}` references unknown bus `{bus}`")]
    UnknownBus { branch: String, bus: String },
    #[error("load `{load}` references unknown bus `{bus}`")]
    UnknownLoadBus { load: String, bus: String },
    #[error("generation bus `{0}` does not exist")]
    UnknownGenerationBus(String),
    #[error("breaker controls unknown line `{0}`")]
    UnknownBreakerLine(String),
    #[error("breaker must control a line, `{0}` is a transformer")]
    BreakerOnTransformer(String),
    #[error("expected exactly one slack bus, found {0}")]
    SlackCount(usize),
    #[error("network is not a radial tree rooted at the slack bus")]
    NotRadial,
    #[error("`{field}` of `{id}` must be positive")]
    NonPositive { id: String, field: &'static str },
}

impl GridTopology {
    /// Structural validation. Runs once at startup; any error here is fatal
    /// before the cycle loop begins.
    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.s_base_mva <= 0.0 {
            return Err(TopologyError::NonPositive {
                id: "topology".into(),
                field: "s_base_mva",
            });
        }

        let mut ids = std::collections::HashSet::new();
        for bus in &self.buses {
            if !ids.insert(bus.id.clone()) {
                return Err(TopologyError::DuplicateId(bus.id.clone()));
            }
            if bus.vn_kv <= 0.0 {
                return Err(TopologyError::NonPositive {
                    id: bus.id.clone(),
                    field: "vn_kv",
                });
            }
        }
        for branch in &self.branches {
            if !ids.insert(branch.id.clone()) {
                return Err(TopologyError::DuplicateId(branch.id.clone()));
            }
            for bus in [&branch.from_bus, &branch.to_bus] {
                if !self.buses.iter().any(|b| &b.id == bus) {
                    return Err(TopologyError::UnknownBus {
                        branch: branch.id.clone(),
                        bus: bus.clone(),
                    });
                }
            }
            match &branch.kind {
                BranchKind::Line {
                    length_km, max_i_ka, ..
                } => {
                    if *length_km <= 0.0 {
                        return Err(TopologyError::NonPositive {
                            id: branch.id.clone(),
                            field: "length_km",
                        });
                    }
                    if *max_i_ka <= 0.0 {
                        return Err(TopologyError::NonPositive {
                            id: branch.id.clone(),
                            field: "max_i_ka",
                        });
                    }
                }
                BranchKind::Transformer {
                    sn_mva, vk_percent, ..
                } => {
                    if *sn_mva <= 0.0 {
                        return Err(TopologyError::NonPositive {
                            id: branch.id.clone(),
                            field: "sn_mva",
                        });
                    }
                    if *vk_percent <= 0.0 {
                        return Err(TopologyError::NonPositive {
                            id: branch.id.clone(),
                            field: "vk_percent",
                        });
                    }
                }
            }
        }
        for load in &self.loads {
            if !ids.insert(load.id.clone()) {
                return Err(TopologyError::DuplicateId(load.id.clone()));
            }
            if !self.buses.iter().any(|b| b.id == load.bus) {
                return Err(TopologyError::UnknownLoadBus {
                    load: load.id.clone(),
                    bus: load.bus.clone(),
                });
            }
        }
        if let Some(bus) = &self.generation_bus {
            if !self.buses.iter().any(|b| &b.id == bus) {
                return Err(TopologyError::UnknownGenerationBus(bus.clone()));
            }
        }

        match self
            .branches
            .iter()
            .find(|b| b.id == self.breaker.controls)
        {
            None => return Err(TopologyError::UnknownBreakerLine(self.breaker.controls.clone())),
            Some(branch) => {
                if matches!(branch.kind, BranchKind::Transformer { .. }) {
                    return Err(TopologyError::BreakerOnTransformer(branch.id.clone()));
                }
            }
        }

        let slacks = self
            .buses
            .iter()
            .filter(|b| matches!(b.kind, BusKind::Slack { .. }))
            .count();
        if slacks != 1 {
            return Err(TopologyError::SlackCount(slacks));
        }

        // Radial check: a connected tree has exactly buses-1 branches and every
        // bus reachable from the slack.
        if self.branches.len() + 1 != self.buses.len() {
            return Err(TopologyError::NotRadial);
        }
        let slack = self
            .buses
            .iter()
            .position(|b| matches!(b.kind, BusKind::Slack { .. }))
            .unwrap();
        let mut seen = vec![false; self.buses.len()];
        let mut stack = vec![slack];
        seen[slack] = true;
        while let Some(i) = stack.pop() {
            let id = &self.buses[i].id;
            for branch in &self.branches {
                let other = if &branch.from_bus == id {
                    &branch.to_bus
                } else if &branch.to_bus == id {
                    &branch.from_bus
                } else {
                    continue;
                };
                let j = self.buses.iter().position(|b| &b.id == other).unwrap();
                if !seen[j] {
                    seen[j] = true;
                    stack.push(j);
                }
            }
        }
        if seen.iter().any(|s| !s) {
            return Err(TopologyError::NotRadial);
        }

        Ok(())
    }

    /// Default three-bus feeder: 110 kV grid connection, 110/11 kV transformer,
    /// one breaker-gated 11 kV cable feeding the mixed-class load center.
    pub fn default_feeder() -> Self {
        GridTopology {
            s_base_mva: 1.0,
            buses: vec![
                BusSpec {
                    id: "substation_hv".into(),
                    vn_kv: 110.0,
                    kind: BusKind::Slack { vm_pu: 1.02 },
                },
                BusSpec {
                    id: "substation_mv".into(),
                    vn_kv: 11.0,
                    kind: BusKind::Pq,
                },
                BusSpec {
                    id: "load_center".into(),
                    vn_kv: 11.0,
                    kind: BusKind::Pq,
                },
            ],
            branches: vec![
                BranchSpec {
                    id: "main_transformer".into(),
                    from_bus: "substation_hv".into(),
                    to_bus: "substation_mv".into(),
                    kind: BranchKind::Transformer {
                        sn_mva: 5.0,
                        vk_percent: 8.0,
                        vkr_percent: 0.6,
                    },
                },
                BranchSpec {
                    id: "feeder_line".into(),
                    from_bus: "substation_mv".into(),
                    to_bus: "load_center".into(),
                    kind: BranchKind::Line {
                        r_ohm_per_km: 0.206,
                        x_ohm_per_km: 0.116,
                        length_km: 2.0,
                        max_i_ka: 0.142,
                    },
                },
            ],
            loads: vec![
                LoadSpec {
                    id: "industrial_park".into(),
                    bus: "load_center".into(),
                    class: CustomerClass::Industrial,
                    p_mw: 0.60,
                    q_mvar: 0.20,
                },
                LoadSpec {
                    id: "retail_strip".into(),
                    bus: "load_center".into(),
                    class: CustomerClass::Commercial,
                    p_mw: 0.35,
                    q_mvar: 0.11,
                },
                LoadSpec {
                    id: "housing_estate".into(),
                    bus: "load_center".into(),
                    class: CustomerClass::Residential,
                    p_mw: 0.25,
                    q_mvar: 0.08,
                },
            ],
            breaker: BreakerSpec {
                controls: "feeder_line".into(),
            },
            generation_bus: Some("substation_mv".into()),
        }
    }
}
