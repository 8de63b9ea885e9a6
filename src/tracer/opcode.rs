//! Call-tree reconstruction from a struct-log opcode stream.
//!
//! Frames live in an arena and are linked by index while the stream is walked;
//! `open_by_depth` maps each call depth to the frame currently executing there.
//! Opcodes executed at depth `d` belong to the frame opened at key `d - 1`: the
//! root occupies key 0 and its own steps run at depth 1.

use alloy_primitives::{B256, Bytes, hex};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::decoder::DecodingContext;
use crate::models::common::BuildOptions;
use crate::models::decoded::{DecodedOutput, DecodedRevert};
use crate::models::errors::BuildError;
use crate::models::traces::{
    AnnotatedCallFrame, AnnotatedEvent, Anomaly, AnomalyKind, CallTree, OpcodeTrace, Operation,
    RawOpcodeStep, RootCall,
};
use crate::tracer::layout::{FIRST_TOPIC, OpcodeClass, Terminator, call_layout};
use crate::tracer::memory::{StepReader, word_to_address};

struct Node {
    frame: AnnotatedCallFrame,
    children: Vec<usize>,
    resolved: bool,
    /// Gas available on the first step inside the frame.
    entry_gas: Option<u64>,
    /// Gas spent by the frame and its descendants, known once execution leaves it.
    gas_total: Option<u64>,
}

struct TreeBuilder<'a> {
    context: &'a DecodingContext,
    options: BuildOptions,
    /// Depth the tracer reports for the root's own steps.
    base: u64,
    nodes: Vec<Node>,
    open_by_depth: BTreeMap<u64, usize>,
    anomalies: Vec<Anomaly>,
}

pub fn build_from_opcodes(
    trace: &OpcodeTrace,
    root: &RootCall,
    context: &DecodingContext,
    options: BuildOptions,
) -> Result<CallTree, BuildError> {
    let steps = &trace.struct_logs;
    let first = steps.first().ok_or(BuildError::EmptyTrace)?;

    let mut builder = TreeBuilder::new(root, context, options, first.depth);
    let mut previous: Option<&RawOpcodeStep> = None;
    for (index, step) in steps.iter().enumerate() {
        let depth = builder.depth_of(step);
        if let Some(last) = previous.filter(|last| builder.depth_of(last) > depth) {
            builder.leave_frames(depth, last);
        }
        previous = Some(step);

        let Some(class) = OpcodeClass::classify(&step.op) else {
            if let Some(error) = &step.error {
                builder.record_step_error(depth, error);
            }
            continue;
        };
        let reader = StepReader::new(index, step);
        let next = steps.get(index + 1);

        match class {
            OpcodeClass::Frame(operation) => builder.open_frame(&reader, depth, operation, next)?,
            OpcodeClass::Terminator(terminator) => builder.close_frame(&reader, depth, terminator, next)?,
            OpcodeClass::Log { topics } => builder.record_log(&reader, depth, topics)?,
        }
    }

    Ok(builder.finish(trace))
}

impl<'a> TreeBuilder<'a> {
    fn new(root: &RootCall, context: &'a DecodingContext, options: BuildOptions, base: u64) -> Self {
        let mut frame = AnnotatedCallFrame::new(Operation::Fallback, 0);
        frame.from = root.from;
        frame.address = root.to;
        frame.code_address = root.to;
        frame.value = root.value;
        frame.call_data = root.calldata.clone();
        frame.decoded_input = context.try_decode_calldata(&root.calldata);

        Self {
            context,
            options,
            base,
            nodes: vec![Node {
                frame,
                children: Vec::new(),
                resolved: false,
                entry_gas: None,
                gas_total: None,
            }],
            open_by_depth: BTreeMap::from([(0, 0)]),
            anomalies: Vec::new(),
        }
    }

    /// Normalized depth: the root's own steps run at 1 whatever the tracer's base.
    fn depth_of(&self, step: &RawOpcodeStep) -> u64 {
        step.depth.saturating_sub(self.base) + 1
    }

    /// CALL-family opcode at `depth`: the new frame opens at key `depth` under
    /// the frame executing the opcode.
    fn open_frame(
        &mut self,
        reader: &StepReader<'_>,
        depth: u64,
        operation: Operation,
        next: Option<&RawOpcodeStep>,
    ) -> Result<(), BuildError> {
        let Some(layout) = call_layout(operation) else {
            return Ok(());
        };
        let (target, value, call_data) = match reader.stack_nth(layout.deepest()) {
            Ok(_) => (
                layout.address.map(|n| reader.stack_nth(n)).transpose()?,
                layout.value.map(|n| reader.stack_nth(n)).transpose()?,
                self.memory(reader, depth, layout.input_offset, layout.input_length)?
                    .unwrap_or_default(),
            ),
            // Still open a frame so the callee's steps land on it, not on a stale sibling
            Err(e) => {
                self.short_stack(reader, depth, e)?;
                (None, None, Bytes::new())
            }
        };
        let parent = self.parent_of(reader, depth)?;

        let parent_frame = &self.nodes[parent].frame;
        let target = target.map(word_to_address);
        let mut frame = AnnotatedCallFrame::new(operation, depth as usize);
        match operation {
            Operation::DelegateCall => {
                frame.from = parent_frame.from;
                frame.address = parent_frame.address;
            }
            Operation::CallCode => {
                frame.from = parent_frame.address;
                frame.address = parent_frame.address;
            }
            _ => {
                frame.from = parent_frame.address;
                frame.address = target;
            }
        }
        frame.code_address = target;
        frame.value = value;
        frame.gas_cost = reader.step.gas_cost;
        frame.decoded_input = self.context.try_decode_calldata(&call_data);
        frame.call_data = call_data;

        // Precompiles and code-less targets never reach a deeper step
        let entered = next.filter(|next| self.depth_of(next) == depth + 1);
        frame.executed = entered.is_some();
        if !frame.executed {
            debug!("{} at step {} did not enter a new frame", operation, reader.index);
        }

        let index = self.nodes.len();
        self.nodes.push(Node {
            frame,
            children: Vec::new(),
            resolved: false,
            entry_gas: entered.map(|step| step.gas),
            gas_total: None,
        });
        self.nodes[parent].children.push(index);
        self.open_by_depth.insert(depth, index);
        Ok(())
    }

    /// RETURN-family opcode at `depth` ends the frame at key `depth - 1`.
    fn close_frame(
        &mut self,
        reader: &StepReader<'_>,
        depth: u64,
        terminator: Terminator,
        next: Option<&RawOpcodeStep>,
    ) -> Result<(), BuildError> {
        let Some(&index) = self.open_by_depth.get(&depth.saturating_sub(1)) else {
            return self.missing_parent(reader, depth);
        };
        if self.nodes[index].resolved {
            return Err(BuildError::FrameAlreadyResolved {
                step: reader.index,
                depth: depth - 1,
                op: reader.step.op.clone(),
            });
        }

        let data = match terminator.data_layout() {
            Some(layout) => self.memory(reader, depth, layout.offset, layout.length)?,
            None => None,
        };
        // A finished CREATE leaves the new address on the caller's stack top
        let created = match self.nodes[index].frame.operation {
            Operation::Create | Operation::Create2 => next
                .filter(|next| self.depth_of(next) + 1 == depth)
                .and_then(|next| StepReader::new(reader.index + 1, next).stack_nth(0).ok())
                .filter(|word| !word.is_zero()),
            _ => None,
        };

        let context = self.context;
        let node = &mut self.nodes[index];
        node.resolved = true;
        let frame = &mut node.frame;
        match terminator {
            Terminator::Return => {
                if let Some(data) = data {
                    frame.decoded_output = frame
                        .selector()
                        .and_then(|selector| context.try_decode_output(selector, &data));
                    frame.return_data = data;
                }
            }
            Terminator::Revert => {
                frame.reverted = true;
                if let Some(data) = data {
                    frame.decoded_output = decode_revert_payload(context, &data).map(DecodedOutput::Revert);
                    frame.return_data = data;
                }
            }
            Terminator::Invalid => {
                frame.reverted = true;
                frame.error.get_or_insert_with(|| "invalid opcode".to_string());
            }
            Terminator::SelfDestruct => {}
        }
        if let Some(created) = created {
            frame.address = Some(word_to_address(created));
        }
        Ok(())
    }

    /// Execution dropped back to `depth`: every frame keyed at `depth` or deeper
    /// has ended, the innermost one on `last`. STOP and halting errors end
    /// frames this way without a terminator.
    fn leave_frames(&mut self, depth: u64, last: &RawOpcodeStep) {
        let ended = self.open_by_depth.split_off(&depth);
        let innermost = self.depth_of(last).saturating_sub(1);
        if let Some(&index) = ended.get(&innermost) {
            self.settle_gas(index, last);
        }
    }

    fn settle_gas(&mut self, index: usize, last: &RawOpcodeStep) {
        let node = &mut self.nodes[index];
        let (Some(entry), None) = (node.entry_gas, node.gas_total) else {
            return;
        };
        // An exceptional halt burns everything the frame was given
        let spent = if last.error.is_some() && last.op != "REVERT" {
            entry
        } else {
            entry.saturating_sub(last.gas).saturating_add(last.gas_cost)
        };
        node.gas_total = Some(spent.min(entry));
    }

    /// LOGn at `depth` belongs to the frame at key `depth - 1`. Logs that do not
    /// decode to a known event are dropped.
    fn record_log(&mut self, reader: &StepReader<'_>, depth: u64, topic_count: usize) -> Result<(), BuildError> {
        let data_layout = OpcodeClass::log_data();
        let Some(data) = self.memory(reader, depth, data_layout.offset, data_layout.length)? else {
            return Ok(());
        };
        let mut topics = Vec::with_capacity(topic_count);
        for position in FIRST_TOPIC..FIRST_TOPIC + topic_count {
            match reader.stack_nth(position) {
                Ok(word) => topics.push(B256::from(word)),
                Err(e) => return self.short_stack(reader, depth, e),
            }
        }
        let Some(&index) = self.open_by_depth.get(&depth.saturating_sub(1)) else {
            return self.missing_parent(reader, depth);
        };

        let Some(decoded) = self.context.try_decode_log(&topics, &data) else {
            debug!("Dropping undecoded {} at step {}", reader.step.op, reader.index);
            return Ok(());
        };
        self.nodes[index].frame.events.push(AnnotatedEvent {
            topics: topics.iter().map(|topic| topic.to_string()).collect(),
            raw_data: data,
            name: decoded.event_name,
            args: Some(decoded.args),
            gas: None,
            gas_used: None,
        });
        Ok(())
    }

    /// Halting errors (out of gas, stack underflow, ...) are reported on the
    /// failing step rather than through an opcode.
    fn record_step_error(&mut self, depth: u64, error: &str) {
        let key = depth.saturating_sub(1);
        if let Some(&index) = self.open_by_depth.get(&key) {
            let frame = &mut self.nodes[index].frame;
            frame.reverted = true;
            frame.error.get_or_insert_with(|| error.to_string());
        }
    }

    fn parent_of(&mut self, reader: &StepReader<'_>, depth: u64) -> Result<usize, BuildError> {
        let key = depth.saturating_sub(1);
        if let Some(&parent) = self.open_by_depth.get(&key) {
            return Ok(parent);
        }
        self.missing_parent(reader, depth)?;
        // Attach to the nearest shallower open frame so the call stays visible
        Ok(self
            .open_by_depth
            .range(..key)
            .next_back()
            .map_or(0, |(_, &index)| index))
    }

    /// Memory region addressed by two stack arguments. An out-of-range region
    /// is recorded and yields empty bytes; a short stack skips the field.
    fn memory(
        &mut self,
        reader: &StepReader<'_>,
        depth: u64,
        offset: usize,
        length: usize,
    ) -> Result<Option<Bytes>, BuildError> {
        match reader.memory_at(offset, length) {
            Ok(Some(bytes)) => Ok(Some(bytes)),
            Ok(None) => {
                debug!("Memory region out of range for {} at step {}", reader.step.op, reader.index);
                self.push_anomaly(reader, depth, AnomalyKind::MemoryOutOfRange);
                Ok(Some(Bytes::new()))
            }
            Err(e) => {
                self.short_stack(reader, depth, e)?;
                Ok(None)
            }
        }
    }

    fn short_stack(&mut self, reader: &StepReader<'_>, depth: u64, error: BuildError) -> Result<(), BuildError> {
        if self.options.strict {
            return Err(error);
        }
        warn!("{}, continuing", error);
        self.push_anomaly(reader, depth, AnomalyKind::StackTooShort);
        Ok(())
    }

    fn missing_parent(&mut self, reader: &StepReader<'_>, depth: u64) -> Result<(), BuildError> {
        let error = BuildError::MissingParent {
            step: reader.index,
            parent_depth: depth.saturating_sub(1),
            op: reader.step.op.clone(),
        };
        if self.options.strict {
            return Err(error);
        }
        warn!("{} (depth {}), continuing", error, depth);
        self.push_anomaly(reader, depth, AnomalyKind::MissingParent);
        Ok(())
    }

    fn push_anomaly(&mut self, reader: &StepReader<'_>, depth: u64, kind: AnomalyKind) {
        self.anomalies.push(Anomaly {
            step: reader.index,
            depth,
            op: reader.step.op.clone(),
            kind,
        });
    }

    fn finish(mut self, trace: &OpcodeTrace) -> CallTree {
        // Frames still open when the trace ends close on its last step
        if let Some(last) = trace.struct_logs.last() {
            let open: Vec<usize> = self.open_by_depth.range(1..).map(|(_, &index)| index).collect();
            for index in open {
                self.settle_gas(index, last);
            }
        }

        let root = &mut self.nodes[0];
        root.gas_total = Some(trace.gas);
        if trace.failed {
            root.frame.reverted = true;
        }
        if !root.resolved {
            let return_value = trace.return_value.trim_start_matches("0x");
            if let Ok(data) = hex::decode(return_value) {
                let data = Bytes::from(data);
                root.frame.decoded_output = if trace.failed {
                    decode_revert_payload(self.context, &data).map(DecodedOutput::Revert)
                } else {
                    root.frame
                        .selector()
                        .and_then(|selector| self.context.try_decode_output(selector, &data))
                };
                root.frame.return_data = data;
            }
        }

        // Children always sit at higher indices than their parent
        let mut built: Vec<Option<AnnotatedCallFrame>> = vec![None; self.nodes.len()];
        for (index, node) in self.nodes.into_iter().enumerate().rev() {
            let mut frame = node.frame;
            frame.children = node
                .children
                .iter()
                .filter_map(|child| built[*child].take())
                .collect();
            frame.gas_used_total = node.gas_total.unwrap_or_default();
            frame.settle_own_gas();
            built[index] = Some(frame);
        }

        CallTree {
            root: built.swap_remove(0).unwrap_or_else(|| AnnotatedCallFrame::new(Operation::Fallback, 0)),
            anomalies: self.anomalies,
        }
    }
}

/// Revert bytes are tried as function-style data first (some contracts bubble
/// up raw call data), then as a custom or generic error.
fn decode_revert_payload(context: &DecodingContext, data: &[u8]) -> Option<DecodedRevert> {
    context
        .try_decode_calldata(data)
        .map(|call| DecodedRevert {
            error_name: call.function_name,
            values: call.arguments,
        })
        .or_else(|| context.try_decode_revert(data))
}
