// src/fusion.rs - Front/side view fusion
use crate::data::{CaptureGroup, CaptureStore, Entity, Frame};
use tracing::{info, warn};

/// Replaces the front view's depth with the side view's negated x for every
/// point. Output length is the shorter of the two inputs; trailing frames of
/// the longer one are dropped.
pub fn combine(primary: &[Frame], secondary: &[Frame], point_count: usize) -> Vec<Frame> {
    primary
        .iter()
        .zip(secondary.iter())
        .map(|(front, side)| {
            let mut fused = front.clone();
            for i in 0..point_count {
                fused[3 * i + 2] = -side[3 * i];
            }
            fused
        })
        .collect()
}

/// Fuses the buffers of every entity in the group in place. An entity is only
/// fused when both of its views hold frames; otherwise its buffers are left
/// untouched. Returns the fused entities with their new frame counts.
pub fn combine_group(store: &mut CaptureStore, group: CaptureGroup) -> Vec<(Entity, usize)> {
    let mut fused_entities = Vec::new();

    for &entity in group.entities() {
        let buffers = store.buffers_mut(entity);
        if buffers.primary.is_empty() || buffers.secondary.is_empty() {
            warn!(
                "Skipping {} fusion: front has {} frame(s), side has {}",
                entity.label(),
                buffers.primary.len(),
                buffers.secondary.len()
            );
            continue;
        }

        let fused = combine(
            buffers.primary.frames(),
            buffers.secondary.frames(),
            entity.point_count(),
        );
        let count = fused.len();
        buffers.primary.replace(fused);
        info!("Combined {} views into {} frame(s)", entity.label(), count);
        fused_entities.push((entity, count));
    }

    fused_entities
}
