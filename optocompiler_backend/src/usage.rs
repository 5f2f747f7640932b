//! Which Programs and Steps are in use, and where.
//!
//! Entities only store forward references (Program → Step IDs, Well → Program IDs). The
//! [`UsageIndex`] inverts them: for every Program the LED slots it is assigned to, and for every
//! Step the Programs containing it. Only used entities are exported, so the index drives the
//! filtering stage of the compiler.
//!
//! Building the index walks the whole plate, so [`UsageCache`] keeps the last one around until
//! the Program list or the plate report a new revision.

use indexmap::{IndexMap, IndexSet};

use crate::plate::Plate;
use crate::program::ProgramList;
use crate::step::StepList;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageIndex {
    /// Program ID → `(well, led)` slots, for assigned Programs only.
    program_slots: IndexMap<u32, Vec<(usize, usize)>>,
    /// Step ID → IDs of all Programs containing it (used or not), in list order.
    step_programs: IndexMap<u32, Vec<u32>>,
    used_programs: Vec<u32>,
    used_steps: Vec<u32>,
}

impl UsageIndex {
    pub fn build(steps: &StepList, programs: &ProgramList, plate: &Plate) -> Self {
        let mut program_slots: IndexMap<u32, Vec<(usize, usize)>> = IndexMap::new();
        for (well, led, program) in plate.assignments() {
            program_slots.entry(program).or_default().push((well, led));
        }

        let mut step_programs: IndexMap<u32, Vec<u32>> = IndexMap::new();
        let mut used_step_set = IndexSet::new();
        let mut used_programs = Vec::new();
        for program in programs.iter() {
            let program = program.borrow();
            let used = program_slots.contains_key(&program.id);
            if used {
                used_programs.push(program.id);
            }
            for step in program.unique_steps() {
                step_programs.entry(step).or_default().push(program.id);
                if used {
                    used_step_set.insert(step);
                }
            }
        }
        let used_steps = steps
            .ids()
            .into_iter()
            .filter(|id| used_step_set.contains(id))
            .collect();

        Self {
            program_slots,
            step_programs,
            used_programs,
            used_steps,
        }
    }

    /// Assigned Programs, in Program list order.
    pub fn used_programs(&self) -> &[u32] {
        &self.used_programs
    }

    /// Steps of assigned Programs, in Step list order. The null step is never listed.
    pub fn used_steps(&self) -> &[u32] {
        &self.used_steps
    }

    pub fn is_program_used(&self, id: u32) -> bool {
        self.program_slots.contains_key(&id)
    }

    pub fn is_step_used(&self, id: u32) -> bool {
        self.used_steps.contains(&id)
    }

    /// `(well, led)` slots a Program is assigned to.
    pub fn slots_of(&self, program: u32) -> &[(usize, usize)] {
        self.program_slots
            .get(&program)
            .map_or(&[], Vec::as_slice)
    }

    /// Programs containing a Step, used or not.
    pub fn programs_of(&self, step: u32) -> &[u32] {
        self.step_programs.get(&step).map_or(&[], Vec::as_slice)
    }
}

/// Last built [`UsageIndex`] together with the revisions it was built from.
#[derive(Debug, Default)]
pub struct UsageCache {
    key: Option<(u64, u64)>,
    index: UsageIndex,
}

impl UsageCache {
    pub fn get(&mut self, steps: &StepList, programs: &ProgramList, plate: &Plate) -> &UsageIndex {
        let key = (programs.revision(), plate.revision());
        if self.key != Some(key) {
            self.index = UsageIndex::build(steps, programs, plate);
            self.key = Some(key);
        }
        &self.index
    }

    pub fn invalidate(&mut self) {
        self.key = None;
    }
}

#[cfg(test)]
mod test {
    use crate::plate::*;
    use crate::program::*;
    use crate::step::*;
    use crate::usage::*;

    fn model() -> (StepList, ProgramList, Plate) {
        let mut steps = StepList::new();
        for _ in 0..4 {
            steps.new_step().unwrap();
        }
        let mut programs = ProgramList::new();
        programs.add(Program::new("a", vec![3, 1, 3], AfterEnd::SwitchOff)).unwrap();
        programs.add(Program::new("b", vec![2], AfterEnd::SwitchOff)).unwrap();
        programs.add(Program::new("c", vec![4, 1], AfterEnd::SwitchOff)).unwrap();
        let mut plate = Plate::new(PlateConfig::two_color());
        plate.assign_well(0, 0, Some(3)).unwrap();
        plate.assign_well(7, 1, Some(1)).unwrap();
        (steps, programs, plate)
    }

    #[test]
    fn used_entities_in_list_order() {
        let (steps, programs, plate) = model();
        let usage = UsageIndex::build(&steps, &programs, &plate);
        assert_eq!(usage.used_programs(), &[1, 3]);
        assert_eq!(usage.used_steps(), &[1, 3, 4]);
        assert!(!usage.is_program_used(2));
        assert!(!usage.is_step_used(2));
        assert_eq!(usage.slots_of(1), &[(7, 1)]);
        assert_eq!(usage.programs_of(1), &[1, 3]);
        assert_eq!(usage.programs_of(2), &[2]);
    }

    #[test]
    fn cache_follows_revisions() {
        let (steps, mut programs, mut plate) = model();
        let mut cache = UsageCache::default();
        assert_eq!(cache.get(&steps, &programs, &plate).used_programs(), &[1, 3]);

        plate.assign_well(1, 0, Some(2)).unwrap();
        assert_eq!(cache.get(&steps, &programs, &plate).used_programs(), &[1, 2, 3]);

        programs.push_steps(2, &[4]).unwrap();
        assert!(cache.get(&steps, &programs, &plate).programs_of(4).contains(&2));
    }
}
