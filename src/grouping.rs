//! Ordering of slices and partitioning into stacks.

use std::cmp::Ordering;

use nalgebra::Vector3;

use crate::enums::SortBy;
use crate::geometry::{DIRECTION_ATOL, DIRECTION_RTOL, all_close, unit};
use crate::record::Slice;

/// Ordered stacks of one series; several stacks mean one stack per timepoint.
#[derive(Clone, Debug, Default)]
pub struct GroupedSeries<'a> {
    pub stacks: Vec<Vec<Slice<'a>>>,
}

impl<'a> GroupedSeries<'a> {
    pub fn is_4d(&self) -> bool {
        self.stacks.len() > 1
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    pub fn slices(&self) -> impl Iterator<Item = &Slice<'a>> {
        self.stacks.iter().flatten()
    }

    /// First slice of every timepoint.
    pub fn heads(&self) -> Vec<Slice<'a>> {
        self.stacks.iter().filter_map(|stack| stack.first().copied()).collect()
    }
}

/// Stable sort of slices.
///
/// Sorting by position orders along the normal of the first slice that has
/// one; slices without geometry keep their relative order.
pub fn sort_slices(slices: &mut [Slice<'_>], sort_by: SortBy) {
    match sort_by {
        SortBy::InstanceNumber => slices.sort_by_key(|slice| slice.order_key()),
        SortBy::ImagePositionPatient => {
            let Some(normal) = slices.iter().find_map(|slice| slice.normal()) else {
                return;
            };
            let height = |slice: &Slice<'_>| slice.position.map(|position| position.dot(&normal));
            slices.sort_by(|a, b| match (height(a), height(b)) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            });
        }
    }
}

/// Split a series into stacks.
///
/// Slices are ordered by instance number, then a new stack starts wherever
/// the direction between consecutive positions departs from the direction
/// the current stack runs in. That is the jump back to the first slice of
/// the next timepoint in a 4D acquisition.
pub fn group_stacks(mut slices: Vec<Slice<'_>>) -> GroupedSeries<'_> {
    if slices.is_empty() {
        return GroupedSeries::default();
    }
    sort_slices(&mut slices, SortBy::InstanceNumber);
    if slices.len() < 2 || slices.iter().any(|slice| slice.position.is_none()) {
        return GroupedSeries {
            stacks: vec![slices],
        };
    }

    let mut stacks = Vec::new();
    let mut current = vec![slices[0]];
    let mut direction: Option<Vector3<f64>> = None;
    for pair in slices.windows(2) {
        let (Some(previous), Some(position)) = (pair[0].position, pair[1].position) else {
            continue;
        };
        let step = unit(&(position - previous));
        let continues = match (step, direction) {
            (Some(step), Some(running)) => all_close(&step, &running, DIRECTION_RTOL, DIRECTION_ATOL),
            (Some(step), None) => {
                direction = Some(step);
                true
            }
            (None, _) => false,
        };
        if continues {
            current.push(pair[1]);
        } else {
            stacks.push(std::mem::replace(&mut current, vec![pair[1]]));
            direction = None;
        }
    }
    stacks.push(current);

    log::debug!(
        "Grouped {} slices into {} stack(s)",
        slices.len(),
        stacks.len()
    );
    GroupedSeries { stacks }
}

/// Split multi-frame views into one stack per acquisition volume.
///
/// Frames carry their volume ordinal, so no geometric walk is needed. A
/// stack is ordered by In-Stack Position Number when every frame has one,
/// by position otherwise.
pub fn group_frames(slices: Vec<Slice<'_>>) -> GroupedSeries<'_> {
    let volumes = slices.iter().map(|slice| slice.volume + 1).max().unwrap_or(0);
    let mut stacks = vec![Vec::new(); volumes];
    for slice in slices {
        stacks[slice.volume].push(slice);
    }
    stacks.retain(|stack| !stack.is_empty());
    for stack in &mut stacks {
        let stack_position = |slice: &Slice<'_>| slice.frame_geometry().and_then(|frame| frame.stack_position);
        if stack.iter().all(|slice| stack_position(slice).is_some()) {
            stack.sort_by_key(stack_position);
        } else {
            sort_slices(stack, SortBy::ImagePositionPatient);
        }
    }
    log::debug!("Grouped frames into {} volume(s)", stacks.len());
    GroupedSeries { stacks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::record::SliceRecord;

    fn instances(stack: &[Slice<'_>]) -> Vec<i32> {
        stack
            .iter()
            .map(|slice| slice.record.instance_number.unwrap())
            .collect()
    }

    #[test]
    fn uniform_stack_stays_whole_and_sorted() {
        let mut records = fixtures::axial_series(6, 2.0);
        records.reverse();
        records.swap(1, 4);
        let grouped = group_stacks(Slice::expand(&records));
        assert_eq!(grouped.len(), 1);
        assert!(!grouped.is_4d());
        assert_eq!(instances(&grouped.stacks[0]), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn abrupt_direction_change_splits_once() {
        let mut records = fixtures::axial_series(7, 2.0);
        // from the fifth slice on the stack runs sideways
        for (index, record) in records.iter_mut().enumerate().skip(4) {
            record.image_position = Some(Vector3::new(10.0 + 5.0 * index as f64, 20.0, 6.0));
        }
        let grouped = group_stacks(Slice::expand(&records));
        assert_eq!(grouped.len(), 2);
        assert_eq!(instances(&grouped.stacks[0]), vec![1, 2, 3, 4]);
        assert_eq!(instances(&grouped.stacks[1]), vec![5, 6, 7]);
    }

    #[test]
    fn timepoints_become_stacks() {
        let records = fixtures::axial_4d(3, 5, 2.0);
        let grouped = group_stacks(Slice::expand(&records));
        assert_eq!(grouped.len(), 3);
        assert!(grouped.stacks.iter().all(|stack| stack.len() == 5));
        assert_eq!(instances(&grouped.stacks[2]), vec![11, 12, 13, 14, 15]);
        assert_eq!(grouped.heads().len(), 3);
    }

    #[test]
    fn missing_positions_are_never_split() {
        let records: Vec<_> = (1..=4)
            .map(|instance| SliceRecord {
                instance_number: Some(instance),
                ..Default::default()
            })
            .collect();
        let grouped = group_stacks(Slice::expand(&records));
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped.stacks[0].len(), 4);
    }

    #[test]
    fn single_slice_is_one_stack() {
        let records = fixtures::axial_series(1, 1.0);
        let grouped = group_stacks(Slice::expand(&records));
        assert_eq!(grouped.len(), 1);
    }

    #[test]
    fn frames_group_by_volume() {
        use crate::record::FrameGeometry;
        use ndarray::Array4;

        let frame = |temporal: i32, z: f64| FrameGeometry {
            position: Some(Vector3::new(0.0, 0.0, z)),
            temporal_index: Some(temporal),
            ..Default::default()
        };
        let record = SliceRecord {
            image_orientation: fixtures::axial_record(1, 0.0).image_orientation,
            frames: vec![frame(1, 2.0), frame(1, 0.0), frame(2, 2.0), frame(2, 0.0)],
            pixels: Some(Array4::zeros((4, 2, 2, 1))),
            ..Default::default()
        };
        let records = [record];
        let grouped = group_frames(Slice::expand(&records));
        assert!(grouped.is_4d());
        let frames: Vec<_> = grouped.stacks[1].iter().map(|slice| slice.frame).collect();
        assert_eq!(frames, vec![3, 2]);
    }

    #[test]
    fn frames_follow_in_stack_position() {
        use crate::record::FrameGeometry;
        use ndarray::Array4;

        let frame = |temporal: i32, z: f64, stack_position: i32| FrameGeometry {
            position: Some(Vector3::new(0.0, 0.0, z)),
            temporal_index: Some(temporal),
            stack_position: Some(stack_position),
            ..Default::default()
        };
        let record = SliceRecord {
            image_orientation: fixtures::axial_record(1, 0.0).image_orientation,
            frames: vec![
                frame(1, 0.0, 3),
                frame(1, 1.0, 2),
                frame(1, 2.0, 1),
                frame(2, 0.0, 3),
                frame(2, 1.0, 2),
                frame(2, 2.0, 1),
            ],
            pixels: Some(Array4::zeros((6, 2, 2, 1))),
            ..Default::default()
        };
        let records = [record];
        let grouped = group_frames(Slice::expand(&records));
        let frames: Vec<_> = grouped.stacks[0].iter().map(|slice| slice.frame).collect();
        assert_eq!(frames, vec![2, 1, 0]);

        // without a complete numbering, position decides
        let mut records = records;
        records[0].frames[4].stack_position = None;
        let grouped = group_frames(Slice::expand(&records));
        let frames: Vec<_> = grouped.stacks[1].iter().map(|slice| slice.frame).collect();
        assert_eq!(frames, vec![3, 4, 5]);
    }

    #[test]
    fn sort_by_position_follows_normal() {
        let mut records = fixtures::axial_series(4, 1.5);
        for (record, instance) in records.iter_mut().zip([4, 2, 3, 1]) {
            record.instance_number = Some(instance);
        }
        let mut slices = Slice::expand(&records);
        sort_slices(&mut slices, SortBy::InstanceNumber);
        assert_eq!(instances(&slices), vec![1, 2, 3, 4]);
        sort_slices(&mut slices, SortBy::ImagePositionPatient);
        assert_eq!(instances(&slices), vec![4, 2, 3, 1]);
    }
}
