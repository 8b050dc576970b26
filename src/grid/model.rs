//! Radial power flow over the feeder topology.
//!
//! Backward/forward sweep in per-unit complex phasors: the backward pass
//! accumulates branch currents from the leaves toward the slack bus, the
//! forward pass re-applies voltage drops from the slack outward. The sweep
//! either converges inside the iteration cap or reports divergence; it
//! never hands back a partial result.

use num_complex::Complex64;
use std::collections::HashMap;
use thiserror::Error;

use crate::snapshot::PowerAggregate;

use super::inputs::SolveInput;
use super::topology::{BranchKind, BusKind, GridTopology, TopologyError};

pub const DEFAULT_TOLERANCE_PU: f64 = 1e-6;
pub const DEFAULT_MAX_ITERATIONS: usize = 30;

const SQRT_3: f64 = 1.732_050_807_568_877_2;

#[derive(Debug, Error)]
pub enum SolveError {
    #[error(
        "power flow diverged after {iterations} iterations (max voltage update {max_mismatch:.3e} pu)"
    )]
    Diverged { iterations: usize, max_mismatch: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BusSolution {
    pub bus: String,
    pub voltage_pu: f64,
    pub voltage_kv: f64,
    pub energized: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BranchSolution {
    pub branch: String,
    pub p_from_mw: f64,
    pub q_from_mvar: f64,
    pub current_ka: f64,
    pub loading_percent: f64,
    pub energized: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveResult {
    pub buses: Vec<BusSolution>,
    pub branches: Vec<BranchSolution>,
    pub aggregate: PowerAggregate,
    pub iterations: usize,
}

struct BranchData {
    z_pu: Complex64,
    /// kA per unit of per-unit current at the to-bus voltage level.
    i_base_ka: f64,
}

pub struct GridModel {
    topo: GridTopology,
    bus_index: HashMap<String, usize>,
    branch_data: Vec<BranchData>,
    slack: usize,
    slack_vm_pu: f64,
    breaker_branch: usize,
    generation_bus: Option<usize>,
    tolerance: f64,
    max_iterations: usize,
}

impl GridModel {
    pub fn new(topo: GridTopology) -> Result<Self, TopologyError> {
        topo.validate()?;

        let bus_index: HashMap<String, usize> = topo
            .buses
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id.clone(), i))
            .collect();

        let (slack, slack_vm_pu) = topo
            .buses
            .iter()
            .enumerate()
            .find_map(|(i, b)| match b.kind {
                BusKind::Slack { vm_pu } => Some((i, vm_pu)),
                BusKind::Pq => None,
            })
            .expect("validated topology has a slack bus");

        let s_base = topo.s_base_mva;
        let branch_data = topo
            .branches
            .iter()
            .map(|branch| {
                let to = bus_index[&branch.to_bus];
                let vn_kv = topo.buses[to].vn_kv;
                let z_pu = match &branch.kind {
                    BranchKind::Line {
                        r_ohm_per_km,
                        x_ohm_per_km,
                        length_km,
                        ..
                    } => {
                        let z_base = vn_kv * vn_kv / s_base;
                        Complex64::new(r_ohm_per_km * length_km, x_ohm_per_km * length_km) / z_base
                    }
                    BranchKind::Transformer {
                        sn_mva,
                        vk_percent,
                        vkr_percent,
                    } => {
                        let z = vk_percent / 100.0 * s_base / sn_mva;
                        let r = vkr_percent / 100.0 * s_base / sn_mva;
                        let x = (z * z - r * r).max(0.0).sqrt();
                        Complex64::new(r, x)
                    }
                };
                BranchData {
                    z_pu,
                    i_base_ka: s_base / (SQRT_3 * vn_kv),
                }
            })
            .collect();

        let breaker_branch = topo
            .branches
            .iter()
            .position(|b| b.id == topo.breaker.controls)
            .expect("validated breaker line exists");
        let generation_bus = topo.generation_bus.as_ref().map(|id| bus_index[id]);

        Ok(Self {
            topo,
            bus_index,
            branch_data,
            slack,
            slack_vm_pu,
            breaker_branch,
            generation_bus,
            tolerance: DEFAULT_TOLERANCE_PU,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        })
    }

    pub fn topology(&self) -> &GridTopology {
        &self.topo
    }

    pub fn solve(&self, input: &SolveInput) -> Result<SolveResult, SolveError> {
        let n = self.topo.buses.len();
        let s_base = self.topo.s_base_mva;

        let in_service: Vec<bool> = (0..self.topo.branches.len())
            .map(|i| i != self.breaker_branch || input.breaker.is_closed())
            .collect();

        // Tree discovery from the slack over in-service branches. Buses left
        // unreached are de-energized islands this cycle.
        let mut energized = vec![false; n];
        let mut parent: Vec<Option<(usize, usize)>> = vec![None; n]; // (branch, parent bus)
        let mut order = Vec::with_capacity(n);
        energized[self.slack] = true;
        order.push(self.slack);
        let mut head = 0;
        while head < order.len() {
            let bus = order[head];
            head += 1;
            for (bi, branch) in self.topo.branches.iter().enumerate() {
                if !in_service[bi] {
                    continue;
                }
                let (a, b) = (self.bus_index[&branch.from_bus], self.bus_index[&branch.to_bus]);
                let other = if a == bus {
                    b
                } else if b == bus {
                    a
                } else {
                    continue;
                };
                if !energized[other] {
                    energized[other] = true;
                    parent[other] = Some((bi, bus));
                    order.push(other);
                }
            }
        }

        // Net complex power consumption per energized bus, per-unit.
        let mut s_net = vec![Complex64::new(0.0, 0.0); n];
        let mut served_load_mw = 0.0;
        for class in super::topology::CustomerClass::ALL {
            let nominal: f64 = self
                .topo
                .loads
                .iter()
                .filter(|l| l.class == class)
                .map(|l| l.p_mw)
                .sum();
            if nominal <= 0.0 {
                continue;
            }
            let scale = input.class_loads_mw.get(class) / nominal;
            for load in self.topo.loads.iter().filter(|l| l.class == class) {
                let bus = self.bus_index[&load.bus];
                if !energized[bus] {
                    continue;
                }
                let p = load.p_mw * scale;
                let q = load.q_mvar * scale;
                s_net[bus] += Complex64::new(p, q) / s_base;
                served_load_mw += p;
            }
        }
        let mut injected_generation_mw = 0.0;
        if let Some(bus) = self.generation_bus {
            if energized[bus] && input.generation_mw > 0.0 {
                s_net[bus] -= Complex64::new(input.generation_mw, 0.0) / s_base;
                injected_generation_mw = input.generation_mw;
            }
        }

        // Backward/forward sweep, flat start at the slack setpoint.
        let slack_v = Complex64::new(self.slack_vm_pu, 0.0);
        let mut v: Vec<Complex64> = (0..n)
            .map(|i| if energized[i] { slack_v } else { Complex64::new(0.0, 0.0) })
            .collect();
        let mut branch_current = vec![Complex64::new(0.0, 0.0); self.topo.branches.len()];

        let mut iterations = 0;
        let mut max_mismatch = f64::INFINITY;
        let mut converged = false;
        while iterations < self.max_iterations {
            iterations += 1;

            // Backward: accumulate injection currents up the tree.
            let mut acc = vec![Complex64::new(0.0, 0.0); n];
            for &bus in &order {
                if bus == self.slack {
                    continue;
                }
                acc[bus] += (s_net[bus] / v[bus]).conj();
            }
            for &bus in order.iter().rev() {
                if let Some((branch, parent_bus)) = parent[bus] {
                    branch_current[branch] = acc[bus];
                    let carried = acc[bus];
                    acc[parent_bus] += carried;
                }
            }

            // Forward: re-apply voltage drops from the slack outward.
            max_mismatch = 0.0;
            for &bus in &order {
                let Some((branch, parent_bus)) = parent[bus] else {
                    continue;
                };
                let v_new = v[parent_bus] - self.branch_data[branch].z_pu * branch_current[branch];
                let delta = (v_new - v[bus]).norm();
                if delta > max_mismatch {
                    max_mismatch = delta;
                }
                v[bus] = v_new;
            }

            if !max_mismatch.is_finite() || v.iter().any(|x| !x.re.is_finite() || !x.im.is_finite())
            {
                return Err(SolveError::Diverged {
                    iterations,
                    max_mismatch: f64::INFINITY,
                });
            }
            if max_mismatch < self.tolerance {
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(SolveError::Diverged {
                iterations,
                max_mismatch,
            });
        }

        // Result extraction from the converged state only.
        let buses = self
            .topo
            .buses
            .iter()
            .enumerate()
            .map(|(i, bus)| {
                if energized[i] {
                    let vm = v[i].norm();
                    BusSolution {
                        bus: bus.id.clone(),
                        voltage_pu: vm,
                        voltage_kv: vm * bus.vn_kv,
                        energized: true,
                    }
                } else {
                    BusSolution {
                        bus: bus.id.clone(),
                        voltage_pu: 0.0,
                        voltage_kv: 0.0,
                        energized: false,
                    }
                }
            })
            .collect();

        let mut losses_pu = 0.0;
        let mut slack_out_pu = Complex64::new(0.0, 0.0);
        let branches = self
            .topo
            .branches
            .iter()
            .enumerate()
            .map(|(bi, branch)| {
                let from = self.bus_index[&branch.from_bus];
                let to = self.bus_index[&branch.to_bus];
                // A branch carries flow only when it is in the energized tree.
                let carrying = in_service[bi]
                    && (parent[from].map(|(b, _)| b) == Some(bi)
                        || parent[to].map(|(b, _)| b) == Some(bi));
                if !carrying {
                    return BranchSolution {
                        branch: branch.id.clone(),
                        p_from_mw: 0.0,
                        q_from_mvar: 0.0,
                        current_ka: 0.0,
                        loading_percent: 0.0,
                        energized: false,
                    };
                }

                // Current is accumulated parent->child; express the flow at the
                // configured from-side of the branch.
                let (parent_bus, child_bus) = if parent[to].map(|(b, _)| b) == Some(bi) {
                    (from, to)
                } else {
                    (to, from)
                };
                let i = branch_current[bi];
                let s_from_pu = if parent_bus == from {
                    v[parent_bus] * i.conj()
                } else {
                    -(v[child_bus] * i.conj())
                };
                losses_pu += ((v[parent_bus] - v[child_bus]) * i.conj()).re;
                if parent_bus == self.slack {
                    slack_out_pu += v[parent_bus] * i.conj();
                }

                let current_ka = i.norm() * self.branch_data[bi].i_base_ka;
                let loading_percent = match &branch.kind {
                    BranchKind::Line { max_i_ka, .. } => current_ka / max_i_ka * 100.0,
                    BranchKind::Transformer { sn_mva, .. } => {
                        s_from_pu.norm() * s_base / sn_mva * 100.0
                    }
                };
                BranchSolution {
                    branch: branch.id.clone(),
                    p_from_mw: s_from_pu.re * s_base,
                    q_from_mvar: s_from_pu.im * s_base,
                    current_ka,
                    loading_percent,
                    energized: true,
                }
            })
            .collect();

        let aggregate = PowerAggregate {
            total_load_mw: served_load_mw,
            total_generation_mw: injected_generation_mw,
            grid_import_mw: (slack_out_pu.re * s_base).max(0.0),
            losses_mw: losses_pu * s_base,
        };

        Ok(SolveResult {
            buses,
            branches,
            aggregate,
            iterations,
        })
    }
}
