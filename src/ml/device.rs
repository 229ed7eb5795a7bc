// ============================================================
// Layer 5 — Device Placement
// ============================================================
// Decides where this process trains:
//
//   distributed      one process per accelerator; RANK and
//                    LOCAL_RANK come from the launcher's
//                    environment and an accelerator is mandatory
//
//   single-process   the accelerator when preferred and usable,
//                    otherwise the CPU backend
//
// Gradient synchronisation between distributed replicas belongs
// to the tensor backend; this module only assigns device and rank.

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Use the GPU backend (wgpu) when one is usable
    Accelerator,
    /// Always train on the CPU backend (ndarray)
    Cpu,
}

/// The backend/device a process trains on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeTarget {
    /// Accelerator with the given index
    Accelerator(usize),
    Cpu,
}

/// This process's slot in the (possibly single-member) process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup {
    pub rank:       usize,
    pub local_rank: usize,
    pub world_size: usize,
}

impl ProcessGroup {
    pub fn single() -> Self {
        Self { rank: 0, local_rank: 0, world_size: 1 }
    }

    /// Only the global rank 0 writes checkpoints and logs
    pub fn is_writer(&self) -> bool {
        self.rank == 0
    }

    pub fn is_distributed(&self) -> bool {
        self.world_size > 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub target: ComputeTarget,
    pub group:  ProcessGroup,
}

fn env_usize(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<usize>> {
    env(key)
        .map(|raw| {
            raw.trim()
                .parse::<usize>()
                .with_context(|| format!("Environment variable {key}='{raw}' is not a non-negative integer"))
        })
        .transpose()
}

/// Resolve placement from configuration, accelerator availability and
/// the process environment (`env` returns a variable's value).
pub fn resolve_placement(
    preference:            DevicePreference,
    distributed:           bool,
    accelerator_available: bool,
    env:                   impl Fn(&str) -> Option<String>,
) -> Result<Placement> {
    if distributed {
        let local_rank = env_usize(&env, "LOCAL_RANK")?
            .context("Distributed mode needs LOCAL_RANK in the environment")?;
        let rank = env_usize(&env, "RANK")?
            .context("Distributed mode needs RANK in the environment")?;
        // Without WORLD_SIZE the group is assumed to end at this rank
        let world_size = env_usize(&env, "WORLD_SIZE")?.unwrap_or(rank + 1);

        if rank >= world_size {
            bail!("RANK {rank} is outside WORLD_SIZE {world_size}");
        }
        if preference == DevicePreference::Cpu {
            bail!("Distributed training requires accelerators, but --device cpu was given");
        }
        if !accelerator_available {
            bail!("Distributed training requires an accelerator, and none is available");
        }

        let group = ProcessGroup { rank, local_rank, world_size };
        if local_rank == 0 {
            tracing::info!(
                "[{}] (rank = {}, local_rank = {}, world_size = {}) training...",
                std::process::id(),
                rank,
                local_rank,
                world_size
            );
            tracing::warn!(
                "Gradient synchronisation across processes is left to the backend; \
                 replicas are not all-reduced by this trainer"
            );
        }
        return Ok(Placement {
            target: ComputeTarget::Accelerator(local_rank),
            group,
        });
    }

    let target = match (preference, accelerator_available) {
        (DevicePreference::Accelerator, true) => ComputeTarget::Accelerator(0),
        (DevicePreference::Accelerator, false) => {
            tracing::warn!("No usable accelerator found, falling back to the CPU backend");
            ComputeTarget::Cpu
        }
        (DevicePreference::Cpu, _) => ComputeTarget::Cpu,
    };

    Ok(Placement {
        target,
        group: ProcessGroup::single(),
    })
}

/// Try to run one tiny op on the default wgpu device.
///
/// wgpu panics when no adapter can be created, so the probe runs
/// under catch_unwind.
pub fn accelerator_available() -> bool {
    use burn::{
        backend::{wgpu::WgpuDevice, Wgpu},
        prelude::*,
    };

    std::panic::catch_unwind(|| {
        let device = WgpuDevice::default();
        let probe  = Tensor::<Wgpu, 1>::from_floats([1.0], &device);
        let _: f32 = probe.into_scalar();
    })
    .is_ok()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_single_process_prefers_accelerator() {
        let p = resolve_placement(DevicePreference::Accelerator, false, true, env_of(&[])).unwrap();
        assert_eq!(p.target, ComputeTarget::Accelerator(0));
        assert_eq!(p.group, ProcessGroup::single());
    }

    #[test]
    fn test_single_process_falls_back_to_cpu() {
        let p = resolve_placement(DevicePreference::Accelerator, false, false, env_of(&[])).unwrap();
        assert_eq!(p.target, ComputeTarget::Cpu);
        assert!(p.group.is_writer());
    }

    #[test]
    fn test_cpu_preference_ignores_accelerator() {
        let p = resolve_placement(DevicePreference::Cpu, false, true, env_of(&[])).unwrap();
        assert_eq!(p.target, ComputeTarget::Cpu);
    }

    #[test]
    fn test_distributed_reads_ranks() {
        let env = env_of(&[("LOCAL_RANK", "1"), ("RANK", "3"), ("WORLD_SIZE", "4")]);
        let p   = resolve_placement(DevicePreference::Accelerator, true, true, env).unwrap();

        assert_eq!(p.target, ComputeTarget::Accelerator(1));
        assert_eq!(p.group, ProcessGroup { rank: 3, local_rank: 1, world_size: 4 });
        assert!(!p.group.is_writer());
        assert!(p.group.is_distributed());
    }

    #[test]
    fn test_distributed_without_accelerator_fails() {
        let env = env_of(&[("LOCAL_RANK", "0"), ("RANK", "0")]);
        assert!(resolve_placement(DevicePreference::Accelerator, true, false, env).is_err());
    }

    #[test]
    fn test_distributed_missing_env_fails() {
        let err = resolve_placement(DevicePreference::Accelerator, true, true, env_of(&[("RANK", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("LOCAL_RANK"));
    }

    #[test]
    fn test_distributed_rejects_garbage_rank() {
        let env = env_of(&[("LOCAL_RANK", "zero"), ("RANK", "0")]);
        assert!(resolve_placement(DevicePreference::Accelerator, true, true, env).is_err());
    }

    #[test]
    fn test_rank_outside_world_fails() {
        let env = env_of(&[("LOCAL_RANK", "0"), ("RANK", "4"), ("WORLD_SIZE", "4")]);
        assert!(resolve_placement(DevicePreference::Accelerator, true, true, env).is_err());
    }
}
