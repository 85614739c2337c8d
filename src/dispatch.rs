//! Workgroup-striped compute dispatch.
//!
//! The grid is split into a fixed number of batches; each batch runs
//! on its own worker and walks the flat workgroup range with a
//! batch-count stride. Within a workgroup, subgroups execute as
//! explicit state machines: a routine step either finishes or parks
//! at a barrier, and parked subgroups are driven round-robin through
//! a FIFO until none remain.

use std::collections::VecDeque;

/// Fixed number of dispatch batches.
pub const BATCH_COUNT: u32 = 16;

/// SIMD width: invocations per subgroup.
pub const SIMD_WIDTH: u32 = 4;

/// What a routine step reports back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldResult {
    /// The subgroup ran to completion.
    Finished,
    /// The subgroup parked at a control barrier; re-enter later.
    AtBarrier,
}

/// Static shape of a dispatchable program.
#[derive(Debug, Clone)]
pub struct DispatchShape {
    /// Invocations per workgroup, per axis.
    pub workgroup_size: [u32; 3],
    /// Whether subgroups must be driven individually through
    /// barriers.
    pub contains_control_barriers: bool,
    /// Bytes of per-workgroup scratch.
    pub workgroup_memory_size: usize,
}

impl DispatchShape {
    /// Total invocations in one workgroup.
    pub fn invocations_per_workgroup(&self) -> u32 {
        self.workgroup_size[0] * self.workgroup_size[1] * self.workgroup_size[2]
    }

    /// Subgroups needed to cover one workgroup.
    pub fn subgroups_per_workgroup(&self) -> u32 {
        (self.invocations_per_workgroup() + SIMD_WIDTH - 1) / SIMD_WIDTH
    }
}

/// Everything one subgroup step can see.
#[derive(Debug)]
pub struct InvocationContext<'a> {
    /// Workgroup coordinates.
    pub workgroup_id: [u32; 3],
    /// Flat index of this workgroup within the dispatch.
    pub flat_workgroup: u32,
    /// Workgroup count per axis.
    pub num_workgroups: [u32; 3],
    /// First subgroup this step covers.
    pub first_subgroup: u32,
    /// Number of subgroups this step covers.
    pub subgroup_count: u32,
    /// How many times this subgroup has resumed after a barrier.
    pub resume: u32,
    /// Dispatch shape.
    pub shape: &'a DispatchShape,
    /// Per-workgroup scratch.
    pub workgroup_memory: &'a mut [u8],
}

impl InvocationContext<'_> {
    /// Lane-enable mask for the trailing subgroup: lane `l` of
    /// subgroup `s` is active iff its invocation index is within the
    /// workgroup.
    pub fn active_lane_mask(&self, subgroup_index: u32) -> [bool; SIMD_WIDTH as usize] {
        let invocations = self.shape.invocations_per_workgroup();
        let mut mask = [false; SIMD_WIDTH as usize];
        for (lane, active) in mask.iter_mut().enumerate() {
            *active = subgroup_index * SIMD_WIDTH + (lane as u32) < invocations;
        }
        mask
    }
}

/// One step of subgroup execution.
///
/// Implemented by the JIT-backed program and, in tests, by closures.
pub trait SubgroupStep: Sync {
    /// Runs (or resumes) the subgroups named by `ctx`.
    fn step(&self, ctx: &mut InvocationContext<'_>) -> YieldResult;
}

impl<F> SubgroupStep for F
where
    F: Fn(&mut InvocationContext<'_>) -> YieldResult + Sync,
{
    fn step(&self, ctx: &mut InvocationContext<'_>) -> YieldResult {
        self(ctx)
    }
}

/// Runs the full grid: `group_count` workgroups starting at
/// `base_group`.
pub fn dispatch<R: SubgroupStep>(
    shape: &DispatchShape,
    routine: &R,
    base_group: [u32; 3],
    group_count: [u32; 3],
) {
    let group_total = group_count[0] * group_count[1] * group_count[2];
    if group_total == 0 {
        return;
    }

    let batches = BATCH_COUNT.min(group_total);

    rayon::scope(|scope| {
        for batch_id in 0..batches {
            scope.spawn(move |_| {
                // Each worker owns its batch's workgroup scratch.
                let mut workgroup_memory = vec![0u8; shape.workgroup_memory_size];

                let mut group_index = batch_id;
                while group_index < group_total {
                    run_workgroup(
                        shape,
                        routine,
                        base_group,
                        group_count,
                        group_index,
                        &mut workgroup_memory,
                    );
                    group_index += BATCH_COUNT;
                }
            });
        }
    });
}

fn run_workgroup<R: SubgroupStep>(
    shape: &DispatchShape,
    routine: &R,
    base_group: [u32; 3],
    group_count: [u32; 3],
    group_index: u32,
    workgroup_memory: &mut [u8],
) {
    // Decode the flat index into 3-D offsets.
    let slice = group_count[0] * group_count[1];
    let mut modulo = group_index;
    let offset_z = modulo / slice;
    modulo -= offset_z * slice;
    let offset_y = modulo / group_count[0];
    modulo -= offset_y * group_count[0];
    let offset_x = modulo;

    let workgroup_id = [
        base_group[0] + offset_x,
        base_group[1] + offset_y,
        base_group[2] + offset_z,
    ];

    workgroup_memory.fill(0);

    let subgroups = shape.subgroups_per_workgroup();

    // Subgroup state machines. With barriers each subgroup gets its
    // own machine so they can rendezvous; otherwise one machine spans
    // the whole workgroup.
    struct Machine {
        first_subgroup: u32,
        subgroup_count: u32,
        resume: u32,
    }

    let mut fifo: VecDeque<Machine> = if shape.contains_control_barriers {
        (0..subgroups)
            .map(|subgroup| Machine {
                first_subgroup: subgroup,
                subgroup_count: 1,
                resume: 0,
            })
            .collect()
    } else {
        std::iter::once(Machine {
            first_subgroup: 0,
            subgroup_count: subgroups,
            resume: 0,
        })
        .collect()
    };

    while let Some(mut machine) = fifo.pop_front() {
        let mut ctx = InvocationContext {
            workgroup_id,
            flat_workgroup: group_index,
            num_workgroups: group_count,
            first_subgroup: machine.first_subgroup,
            subgroup_count: machine.subgroup_count,
            resume: machine.resume,
            shape,
            workgroup_memory,
        };

        match routine.step(&mut ctx) {
            YieldResult::Finished => {}
            YieldResult::AtBarrier => {
                machine.resume += 1;
                fifo.push_back(machine);
            }
        }
    }
}

/// Decodes a subgroup-local invocation index into its 3-D local id.
pub fn local_invocation_id(shape: &DispatchShape, invocation_index: u32) -> [u32; 3] {
    let size_x = shape.workgroup_size[0];
    let size_xy = size_x * shape.workgroup_size[1];

    let mut index = invocation_index;
    let z = index / size_xy;
    index -= z * size_xy;
    let y = index / size_x;
    index -= y * size_x;
    [index, y, z]
}
