//! Edge resolution: turning jump semantics into typed edges.
//!
//! The passes run in a fixed order: conditional jumps, unconditional
//! jumps, switch tables, label studies, runtime-jump recovery, then
//! returning instructions and callbacks. Unresolvable targets are logged
//! and skipped; they never abort the analysis.

use std::collections::{BTreeMap, HashMap, HashSet};

use pac_asm::{Instruction, PacFile, SlotClass, TypeByte, Value};

use crate::error::GraphError;
use crate::graph::{BlockId, CodeGraph, ConnectError, Transition, UnrecoveredJump};
use crate::tables::FlowTables;

/// Grouping key for runtime-jump variables: the argument class plus its
/// payload word (float payloads key by their bit pattern).
type VarKey = (SlotClass, u32);

fn value_key(value: &Value) -> u32 {
    match value {
        Value::Int(word) => *word,
        Value::Var(var) => var.index,
        Value::Float(float) => float.to_bits(),
        Value::Str(_) => 0,
    }
}

fn log_connect_failure(error: ConnectError, target: u32) {
    match error {
        ConnectError::NoBlock => {
            tracing::warn!("failed to get a block at offset 0x{target:X}");
        }
        ConnectError::NotInstructionStart => {
            tracing::warn!("0x{target:X} is not a valid instruction start");
        }
    }
}

fn sorted_pairs(map: &HashMap<u32, usize>) -> Vec<(u32, usize)> {
    let mut pairs: Vec<_> = map.iter().map(|(&sig, &index)| (sig, index)).collect();
    pairs.sort_unstable();
    pairs
}

/// Runs the edge-resolution passes over one graph.
pub struct Resolver<'a> {
    graph: &'a mut CodeGraph,
    file: &'a PacFile,
    tables: &'a FlowTables,
}

impl<'a> Resolver<'a> {
    /// A resolver binding the graph to its file and tables.
    pub fn new(graph: &'a mut CodeGraph, file: &'a PacFile, tables: &'a FlowTables) -> Resolver<'a> {
        Resolver { graph, file, tables }
    }

    fn try_connect(
        &mut self,
        location: u32,
        target: u32,
        flags: Transition,
    ) -> Result<(), ConnectError> {
        self.graph.connect(self.file, location, target, flags)
    }

    /// Connect `instruction` to whatever follows it.
    fn connect_next(&mut self, instruction: &Instruction, flags: Transition) -> bool {
        if self.try_connect(instruction.offset, instruction.end(), flags).is_err() {
            tracing::debug!(
                "attempt to connect {} to the next instruction failed",
                instruction.name
            );
            return false;
        }
        true
    }

    fn jump_flags(&self, signature: u32) -> Transition {
        if self.tables.saves_ra(signature) {
            Transition::SAVE_ADDRESS
        } else {
            Transition::empty()
        }
    }

    /// Steps 1 through 5: every jump class plus runtime-jump recovery.
    pub fn apply_jump_passes(&mut self) {
        tracing::debug!("step 1: conditional jumps");
        self.apply_conditional_jumps();
        tracing::debug!("step 2: unconditional jumps");
        self.apply_unconditional_jumps();
        tracing::debug!("step 3: switch-case tables");
        self.apply_switch_tables();
        tracing::debug!("step 4: labels");
        self.elementary_label_study();
        tracing::debug!("step 5: runtime label jumps");
        self.elementary_runtime_jumps();
        self.intermediate_runtime_jumps();
        self.graph.sort_incoming();
    }

    /// Two edges per conditional jump: the taken branch and a fallthrough.
    fn apply_conditional_jumps(&mut self) {
        let file = self.file;
        for (signature, index) in sorted_pairs(&self.tables.cond_jumps) {
            tracing::debug!("processing {} ({signature:X})", self.tables.name(signature));
            let flags = self.jump_flags(signature);
            for &location in file.offsets_with(signature) {
                let Some(instruction) = file.instruction_at(location) else { continue };
                match instruction.args.get(index).and_then(|arg| arg.value.as_word()) {
                    Some(target) => {
                        if let Err(error) = self.try_connect(location, target, flags) {
                            log_connect_failure(error, target);
                        }
                    }
                    None => tracing::warn!(
                        "{} at 0x{location:X} has no jump argument {index}",
                        instruction.name
                    ),
                }
                self.connect_next(instruction, Transition::FALLTHROUGH);
            }
        }
    }

    /// One edge per unconditional jump; `cmd_call` also gets a potential
    /// step-over edge to the next instruction.
    fn apply_unconditional_jumps(&mut self) {
        let file = self.file;
        let cmd_call = self.tables.important.cmd_call;
        for (signature, index) in sorted_pairs(&self.tables.uncond_jumps) {
            tracing::debug!("processing {} ({signature:X})", self.tables.name(signature));
            let flags = self.jump_flags(signature);
            for &location in file.offsets_with(signature) {
                let Some(instruction) = file.instruction_at(location) else { continue };
                match instruction.args.get(index).and_then(|arg| arg.value.as_word()) {
                    Some(target) => {
                        if let Err(error) = self.try_connect(location, target, flags) {
                            log_connect_failure(error, target);
                        }
                    }
                    None => tracing::warn!(
                        "{} at 0x{location:X} has no jump argument {index}",
                        instruction.name
                    ),
                }
                if signature == cmd_call {
                    self.connect_next(instruction, Transition::POTENTIAL);
                }
            }
        }
    }

    /// One plain edge per switch-table branch, from the `cmd_inxJmp` block.
    fn apply_switch_tables(&mut self) {
        let file = self.file;
        let tables: Vec<(u32, Vec<u32>)> = file
            .switch_tables()
            .map(|(offset, branches)| (offset, branches.to_vec()))
            .collect();
        for (table_offset, branches) in tables {
            let Some(owner) = table_offset
                .checked_sub(1)
                .and_then(|before| file.entity_at(before))
                .and_then(|entity| entity.instruction())
            else {
                tracing::warn!("switch-case table at 0x{table_offset:X} has no preceding instruction");
                continue;
            };
            let location = owner.offset;
            for target in branches {
                if let Err(error) = self.try_connect(location, target, Transition::empty()) {
                    log_connect_failure(error, target);
                }
            }
        }
    }

    /// Collect `cmd_setLabelId` bindings, then connect every label-id jump
    /// to every offset its label was bound to.
    fn elementary_label_study(&mut self) {
        let file = self.file;
        let set_label_id = self.tables.important.cmd_set_label_id;

        let mut any = false;
        for instruction in file.instructions_with(set_label_id) {
            any = true;
            let (Some(index_arg), Some(offset_arg)) =
                (instruction.args.first(), instruction.args.get(1))
            else {
                tracing::warn!("cmd_setLabelId at 0x{:X} lacks arguments", instruction.offset);
                continue;
            };
            if !index_arg.slot.is_int_const() {
                tracing::debug!("label index is passed through {}", index_arg.slot.class);
                continue;
            }
            let (Some(label), Some(dest)) =
                (index_arg.value.as_word(), offset_arg.value.as_word())
            else {
                continue;
            };
            self.graph.label_offsets.entry(label).or_default().insert(dest);
        }
        if !any {
            tracing::debug!("no cmd_setLabelId instructions found");
        }

        for signature in [
            self.tables.important.cmd_jmp_label_id,
            self.tables.important.cmd_call_label_id,
        ] {
            tracing::debug!("processing {} ({signature:X})", self.tables.name(signature));
            let flags = self.jump_flags(signature);
            for &location in file.offsets_with(signature) {
                let Some(instruction) = file.instruction_at(location) else { continue };
                let Some(index_arg) = instruction.args.first() else { continue };
                if !index_arg.slot.is_int_const() {
                    tracing::debug!("label index is passed through {}", index_arg.slot.class);
                    continue;
                }
                let Some(label) = index_arg.value.as_word() else { continue };
                let Some(offsets) = self.graph.label_offsets.get(&label).cloned() else {
                    tracing::warn!("unknown label {label} accessed at 0x{location:X}");
                    continue;
                };
                for dest in offsets {
                    if let Err(error) = self.try_connect(location, dest, flags) {
                        log_connect_failure(error, dest);
                    }
                }
            }
        }
    }

    /// Runtime-label jumps that save a return address still flow to the
    /// following block.
    fn elementary_runtime_jumps(&mut self) {
        let file = self.file;
        for signature in [
            self.tables.important.cmd_jmp_label,
            self.tables.important.cmd_call_label,
        ] {
            tracing::debug!("processing {} ({signature:X})", self.tables.name(signature));
            if !self.tables.saves_ra(signature) {
                continue;
            }
            let locations: Vec<u32> = file.offsets_with(signature).to_vec();
            for location in locations {
                let Some(instruction) = file.instruction_at(location) else { continue };
                self.connect_next(instruction, Transition::POTENTIAL);
            }
        }
    }

    /// Try to recover the destinations of variable-carried jumps through
    /// the variable-use index: if exactly one other instruction reads the
    /// local and passes exactly one `0x1` immediate, that immediate is
    /// taken as the destination.
    fn intermediate_runtime_jumps(&mut self) {
        let file = self.file;
        let signatures = [
            self.tables.important.cmd_jmp_label,
            self.tables.important.cmd_call_label,
        ];

        // Jump sites and the variable each one receives its target in.
        let mut sites: BTreeMap<u32, VarKey> = BTreeMap::new();
        for &signature in &signatures {
            tracing::debug!("processing {} ({signature:X})", self.tables.name(signature));
            for &location in file.offsets_with(signature) {
                let Some(instruction) = file.instruction_at(location) else { continue };
                // The destination is carried by the first argument.
                let Some(arg) = instruction.args.first() else { continue };
                sites.insert(location, (arg.slot.class.clone(), value_key(&arg.value)));
            }
        }

        let mut group_order: Vec<VarKey> = Vec::new();
        let mut seen: HashSet<VarKey> = HashSet::new();
        for key in sites.values() {
            if seen.insert(key.clone()) {
                group_order.push(key.clone());
            }
        }

        let recovered = self.attempt_variable_recovery(&group_order, &signatures);

        let mut recovered_count = 0usize;
        for (location, key) in &sites {
            let Some(&target) = recovered.get(key) else {
                let class = key.0.clone();
                let value = file
                    .instruction_at(*location)
                    .and_then(|i| i.args.first())
                    .map(|arg| arg.value.clone())
                    .unwrap_or(Value::Int(key.1));
                self.graph
                    .unrecovered_jumps
                    .insert(*location, UnrecoveredJump { class, value });
                continue;
            };
            let save = file
                .instruction_at(*location)
                .is_some_and(|i| self.tables.saves_ra(i.signature));
            let flags =
                if save { Transition::SAVE_ADDRESS } else { Transition::empty() };
            match self.try_connect(*location, target, flags) {
                Ok(()) => recovered_count += 1,
                Err(error) => log_connect_failure(error, target),
            }
        }
        tracing::debug!(
            recovered = recovered_count,
            unrecovered = self.graph.unrecovered_jumps.len(),
            "runtime jump recovery done"
        );

        // Unrecovered jumps right after getGateInfo are candidates for the
        // gate dataflow study.
        let gate = self.tables.get_gate_info;
        let unrecovered: Vec<u32> = self.graph.unrecovered_jumps.keys().copied().collect();
        for location in unrecovered {
            let preceded = file
                .preceding_entity(location)
                .and_then(|entity| entity.instruction())
                .is_some_and(|instruction| instruction.signature == gate);
            if !preceded {
                tracing::debug!(
                    "unrecognized runtime jump practice: getGateInfo does not precede 0x{location:X}"
                );
                continue;
            }
            if let Some((start, _)) = self.graph.block_by_offset(location) {
                self.graph.gate_info_blocks.insert(start);
            }
        }
    }

    fn attempt_variable_recovery(
        &self,
        groups: &[VarKey],
        jump_signatures: &[u32; 2],
    ) -> HashMap<VarKey, u32> {
        let file = self.file;
        let mut recovered = HashMap::new();
        for key in groups {
            let (class, index) = key;
            let ty = match class {
                SlotClass::Composite(ty) => *ty,
                other => {
                    tracing::debug!("jumping argument received as {other}, not a variable");
                    continue;
                }
            };
            match ty {
                TypeByte::IntLocal => {}
                TypeByte::FloatLocal | TypeByte::FloatGlobal => {
                    tracing::debug!("jumping argument received as a floating {}", ty.label());
                    continue;
                }
                TypeByte::IntGlobal => {
                    tracing::debug!("jumping argument received as an IntGlobal");
                    continue;
                }
                _ => {
                    tracing::debug!("jumping argument received as {}", ty.label());
                    continue;
                }
            }

            let users: Vec<u32> = file
                .var_use()
                .uses(TypeByte::IntLocal, *index)
                .iter()
                .copied()
                .filter(|&offset| {
                    file.instruction_at(offset).is_some_and(|instruction| {
                        !jump_signatures.contains(&instruction.signature)
                            && instruction.one_byte_values().count() == 1
                    })
                })
                .collect();

            match users.as_slice() {
                [offset] => {
                    let Some(value) = file
                        .instruction_at(*offset)
                        .and_then(|instruction| instruction.one_byte_values().next())
                    else {
                        continue;
                    };
                    tracing::debug!(
                        "IntLocal {index:X}: single reference at 0x{offset:X}, value 0x{value:X}"
                    );
                    recovered.insert(key.clone(), value);
                }
                many => {
                    tracing::debug!("IntLocal {index:X} is used {} times", many.len());
                }
            }
        }
        recovered
    }

    /// Step 6: returning instructions flow on, except for the two select
    /// handlers which carry a special reference to a block start.
    pub fn apply_returning(&mut self) {
        tracing::debug!("step 6: returning instructions");
        let file = self.file;
        let returning = self.tables.returning.clone();
        let special = [self.tables.important.do_select, self.tables.important.do_select_cursor];
        for signature in returning {
            tracing::debug!("processing {} ({signature:X})", self.tables.name(signature));
            if special.contains(&signature) {
                for &location in file.offsets_with(signature) {
                    let Some(instruction) = file.instruction_at(location) else { continue };
                    let Some(target) =
                        instruction.args.first().and_then(|arg| arg.value.as_word())
                    else {
                        continue;
                    };
                    match self.graph.block_by_offset(target) {
                        Some((start, _)) if start == target => {
                            if self.try_connect(location, target, Transition::SPECIAL).is_err() {
                                tracing::debug!(
                                    "{} connection failed at 0x{location:X}",
                                    instruction.name
                                );
                            }
                        }
                        _ => tracing::debug!(
                            "unrecognized {} usage practice at 0x{location:X}",
                            instruction.name
                        ),
                    }
                }
                continue;
            }
            for &location in file.offsets_with(signature) {
                let Some(instruction) = file.instruction_at(location) else { continue };
                self.connect_next(instruction, Transition::POTENTIAL);
            }
        }
    }

    /// Step 7: callback receivers fall through to the next block and, when
    /// the callback argument is an immediate, reference its destination.
    pub fn apply_callbacks(&mut self) {
        tracing::debug!("step 7: callback instructions");
        let file = self.file;
        for (signature, index) in sorted_pairs(&self.tables.callbacks) {
            tracing::debug!("processing {} ({signature:X})", self.tables.name(signature));
            for &location in file.offsets_with(signature) {
                let Some(instruction) = file.instruction_at(location) else { continue };
                if self.connect_next(instruction, Transition::FALLTHROUGH) {
                    if let Some((_, id)) = self.graph.block_by_offset(location) {
                        self.graph.block_mut(id).is_split = true;
                    }
                }

                let Some(arg) = instruction.args.get(index) else { continue };
                if !arg.slot.is_immediate_address() {
                    continue;
                }
                let Some(target) = arg.value.as_word() else { continue };
                match self.try_connect(location, target, Transition::CALLBACK) {
                    Ok(()) => {
                        self.graph.callback_destinations.insert(location, target);
                    }
                    Err(error) => log_connect_failure(error, target),
                }
            }
        }
        if self.graph.callback_destinations.is_empty() {
            tracing::debug!("no callbacks found");
        } else {
            tracing::debug!(count = self.graph.callback_destinations.len(), "callbacks found");
        }

        // Record the fallthrough chains the split marks produced.
        let marks: Vec<(u32, bool)> = self
            .graph
            .blocks_in_order()
            .map(|(_, block)| (block.start, block.is_split))
            .collect();
        let mut buffer: Vec<u32> = Vec::new();
        let mut last_was_split = false;
        for (start, is_split) in marks {
            if is_split {
                buffer.push(start);
            } else if last_was_split {
                buffer.push(start);
                self.graph.split_chains.insert(buffer[0], std::mem::take(&mut buffer));
            }
            last_was_split = is_split;
        }
        if !buffer.is_empty() {
            tracing::debug!("the file ends with a split block");
            self.graph.split_chains.insert(buffer[0], buffer);
        }
    }

    /// The gate dataflow study: propagate `setGateInfo` argument pairs to
    /// the `getGateInfo`-preceded runtime jumps reachable from them.
    pub fn gate_dataflow(&mut self) -> Result<(), GraphError> {
        let file = self.file;
        tracing::debug!("gate dataflow study");

        let mut sites: BTreeMap<u32, (u32, u32)> = BTreeMap::new();
        for instruction in file.instructions_with(self.tables.set_gate_info) {
            let Some(last) = instruction.args.last() else { continue };
            if !last.slot.is_one_byte() || instruction.args.len() < 2 {
                continue;
            }
            let before = &instruction.args[instruction.args.len() - 2];
            if !before.slot.is_int_const() {
                tracing::debug!(
                    "the info argument of setGateInfo at 0x{:X} is not an integer",
                    instruction.offset
                );
                continue;
            }
            let (Some(info), Some(dest)) = (before.value.as_word(), last.value.as_word()) else {
                continue;
            };
            sites.insert(instruction.offset, (info, dest));
        }
        if sites.is_empty() {
            return Ok(());
        }

        let starts: HashSet<u32> = self.graph.starts().iter().copied().collect();
        let unknown = sites.values().filter(|(_, dest)| !starts.contains(dest)).count();
        if unknown > 0 {
            // The destinations would require new block boundaries.
            return Err(GraphError::UnknownGateDestinations { count: unknown });
        }

        for (&site, &info) in &sites {
            let Some((_, start_id)) = self.graph.block_by_offset(site) else { continue };
            let mut visited: HashSet<BlockId> = HashSet::new();
            let mut stack = vec![start_id];
            visited.insert(start_id);
            while let Some(vertex) = stack.pop() {
                let successors: Vec<(BlockId, u32)> = self
                    .graph
                    .outgoing(vertex)
                    .map(|(_, edge)| (edge.to, edge.to_pos))
                    .collect();
                for (to, to_pos) in successors {
                    if visited.contains(&to) || sites.contains_key(&to_pos) {
                        continue;
                    }
                    if self.graph.gate_info_blocks.contains(&to_pos) {
                        self.graph.dataflow_inputs.entry(to_pos).or_default().insert(info);
                        continue;
                    }
                    visited.insert(to);
                    stack.push(to);
                }
            }
        }
        Ok(())
    }
}
