//! Tree-walking reference evaluator
//!
//! Executes a network directly from the program tree and symbol model,
//! under the same observable semantics as the generated artifact: REST
//! initialization, SENSE injection, then tidal cycles over the queues in
//! declaration order until quiescence or the cycle cap. Conformance tests
//! compare this evaluator's drained output against the documented format.
//!
//! Signals emitted by a running handler join their queue immediately but
//! are dispatched on a later pass: each queue is serviced only up to the
//! depth observed when the pass began, matching the generated scheduler's
//! tail snapshot.

mod machine;
pub mod value;

pub use value::Value;

use crate::ast::{Handler, Network, RuleDef, StateFieldDef, Stmt, TypeRef};
use crate::layout::SymbolTable;
use machine::Activation;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// A signal payload in flight: built at `emit`, dropped after the last
/// destination consumed it.
#[derive(Debug)]
pub struct Payload {
    pub frequency: String,
    pub fields: RefCell<HashMap<String, Value>>,
}

#[derive(Clone)]
struct HandlerEntry {
    binding: String,
    guard: Option<crate::ast::Expr>,
    body: Rc<Vec<Stmt>>,
}

pub struct Evaluator {
    pub(crate) syms: SymbolTable,
    handlers: HashMap<(String, String), HandlerEntry>,
    rests: Vec<(String, Rc<Vec<Stmt>>)>,
    cycles: Vec<(String, u64, Rc<Vec<Stmt>>)>,
    pub(crate) rules: HashMap<(String, String), Rc<RuleDef>>,
    state_defs: HashMap<String, Vec<StateFieldDef>>,
    hyphal_of: HashMap<String, String>,

    pub(crate) states: HashMap<String, HashMap<String, Value>>,
    queues: Vec<VecDeque<Rc<Payload>>>,
    pub(crate) output: String,
    drained: Vec<String>,
    pub(crate) reports: HashMap<String, Vec<(String, Value)>>,
    cycles_used: u64,
    hit_max_cycles: bool,
    cli_source: String,
    cli_output: String,
}

impl Evaluator {
    pub fn new(net: &Network, syms: &SymbolTable) -> Self {
        let mut handlers = HashMap::new();
        let mut rests = Vec::new();
        let mut cycles = Vec::new();
        let mut rules = HashMap::new();
        let mut state_defs = HashMap::new();
        let mut hyphal_of = HashMap::new();

        for hyphal in &net.hyphae {
            state_defs.insert(hyphal.name.clone(), hyphal.state.clone());
            for rule in &hyphal.rules {
                rules.insert(
                    (hyphal.name.clone(), rule.name.clone()),
                    Rc::new(rule.clone()),
                );
            }
        }
        for agent in &syms.agents {
            hyphal_of.insert(agent.id.clone(), agent.hyphal.clone());
            let Some(hyphal) = net.find_hyphal(&agent.hyphal) else {
                continue;
            };
            for handler in &hyphal.handlers {
                match handler {
                    Handler::Rest { body } => {
                        rests.push((agent.id.clone(), Rc::new(body.clone())));
                    }
                    Handler::Signal {
                        frequency,
                        binding,
                        guard,
                        body,
                    } => {
                        handlers.insert(
                            (agent.id.clone(), frequency.clone()),
                            HandlerEntry {
                                binding: binding.clone(),
                                guard: guard.clone(),
                                body: Rc::new(body.clone()),
                            },
                        );
                    }
                    Handler::Cycle { number, body } => {
                        cycles.push((agent.id.clone(), *number, Rc::new(body.clone())));
                    }
                }
            }
        }

        let queues = vec![VecDeque::new(); syms.routes.len()];
        Evaluator {
            syms: syms.clone(),
            handlers,
            rests,
            cycles,
            rules,
            state_defs,
            hyphal_of,
            states: HashMap::new(),
            queues,
            output: String::new(),
            drained: Vec::new(),
            reports: HashMap::new(),
            cycles_used: 0,
            hit_max_cycles: false,
            cli_source: "test.mycelial".to_string(),
            cli_output: "a.out".to_string(),
        }
    }

    /// Override the CLI argument values injected into the `startup`
    /// frequency during SENSE.
    pub fn set_cli(&mut self, source: &str, output: &str) {
        self.cli_source = source.to_string();
        self.cli_output = output.to_string();
    }

    /// Stand in for an external signal source: enqueue a payload on the
    /// (fruiting body, frequency) queue before the run starts. Missing
    /// fields read as zero, like fresh arena memory.
    pub fn inject(
        &mut self,
        source: &str,
        frequency: &str,
        fields: Vec<(&str, Value)>,
    ) -> Result<(), String> {
        if !self.syms.is_input(source) {
            return Err(format!("'{}' is not an input fruiting body", source));
        }
        let route = self
            .syms
            .route(source, frequency)
            .ok_or_else(|| format!("no socket from '{}' carries '{}'", source, frequency))?
            .queue_index;
        let layout = self
            .syms
            .frequency(frequency)
            .ok_or_else(|| format!("unknown frequency '{}'", frequency))?
            .clone();
        let mut values = HashMap::new();
        for slot in &layout.fields {
            values.insert(slot.name.clone(), Value::zero_of(&slot.ty));
        }
        for (name, value) in fields {
            if layout.field(name).is_none() {
                return Err(format!(
                    "frequency '{}' has no field '{}'",
                    frequency, name
                ));
            }
            values.insert(name.to_string(), value);
        }
        self.queues[route].push_back(Rc::new(Payload {
            frequency: frequency.to_string(),
            fields: RefCell::new(values),
        }));
        Ok(())
    }

    /// Build an enum value through the symbol model (test helper for
    /// injecting tagged payloads).
    pub fn enum_payload(
        &self,
        enum_name: &str,
        variant: &str,
        payload: Option<Value>,
    ) -> Result<Value, String> {
        self.make_enum(enum_name, variant, payload)
    }

    /// Run the network: REST, SENSE, then tidal cycles to quiescence.
    pub fn run(&mut self) -> Result<(), String> {
        self.rest_phase()?;
        self.sense_phase()?;
        self.act_phase()
    }

    fn rest_phase(&mut self) -> Result<(), String> {
        let agents: Vec<(String, String)> = self
            .syms
            .agents
            .iter()
            .map(|a| (a.id.clone(), a.hyphal.clone()))
            .collect();

        // Zero-init every field, pre-create containers, then run defaults
        for (id, hyphal) in &agents {
            let defs = self.state_defs.get(hyphal).cloned().unwrap_or_default();
            let mut state = HashMap::new();
            for def in &defs {
                let value = match &def.ty {
                    TypeRef::Vec(_) | TypeRef::Queue(_) => Value::list(Vec::new()),
                    TypeRef::Map(_, _) => Value::map(),
                    ty => Value::zero_of(ty),
                };
                state.insert(def.name.clone(), value);
            }
            self.states.insert(id.clone(), state);
            for def in &defs {
                if let Some(default) = &def.default {
                    let mut act = Activation::new(id.clone(), hyphal.clone(), None);
                    let value = self.eval_expr(&mut act, default)?;
                    self.states
                        .get_mut(id)
                        .unwrap()
                        .insert(def.name.clone(), value);
                }
            }
        }

        let rests = self.rests.clone();
        for (id, body) in rests {
            let hyphal = self.hyphal_of[&id].clone();
            let mut act = Activation::new(id, hyphal, None);
            self.exec_stmts(&mut act, &body)?;
        }
        Ok(())
    }

    fn sense_phase(&mut self) -> Result<(), String> {
        let routes = self.syms.routes.clone();
        for route in &routes {
            if !self.syms.is_input(&route.source) {
                continue;
            }
            let layout = self.syms.frequency(&route.frequency).unwrap().clone();
            if route.frequency == "startup" {
                let mut values = HashMap::new();
                for slot in &layout.fields {
                    values.insert(slot.name.clone(), Value::zero_of(&slot.ty));
                }
                if layout.field("source_file").is_some() {
                    values.insert(
                        "source_file".to_string(),
                        Value::str(self.cli_source.clone()),
                    );
                }
                if layout.field("output_file").is_some() {
                    values.insert(
                        "output_file".to_string(),
                        Value::str(self.cli_output.clone()),
                    );
                }
                self.queues[route.queue_index].push_back(Rc::new(Payload {
                    frequency: route.frequency.clone(),
                    fields: RefCell::new(values),
                }));
            } else if self.queues[route.queue_index].is_empty() {
                // No explicit injection stood in for this source: a single
                // zeroed payload, as the generated scheduler produces
                let mut values = HashMap::new();
                for slot in &layout.fields {
                    values.insert(slot.name.clone(), Value::zero_of(&slot.ty));
                }
                self.queues[route.queue_index].push_back(Rc::new(Payload {
                    frequency: route.frequency.clone(),
                    fields: RefCell::new(values),
                }));
            }
        }
        Ok(())
    }

    fn act_phase(&mut self) -> Result<(), String> {
        let routes = self.syms.routes.clone();
        let max_cycles = self.syms.max_cycles;
        let mut cycle: u64 = 0;
        loop {
            cycle += 1;
            if cycle > max_cycles {
                self.output.push_str(&format!(
                    "warning: tidal scheduler stopped after {} cycles\n",
                    max_cycles
                ));
                self.hit_max_cycles = true;
                break;
            }

            // Cycle handlers fire at the top of their matching cycle
            let due: Vec<(String, Rc<Vec<Stmt>>)> = self
                .cycles
                .iter()
                .filter(|(_, number, _)| *number == cycle)
                .map(|(id, _, body)| (id.clone(), Rc::clone(body)))
                .collect();
            for (id, body) in due {
                let hyphal = self.hyphal_of[&id].clone();
                let mut act = Activation::new(id, hyphal, None);
                self.exec_stmts(&mut act, &body)?;
            }

            let mut processed: u64 = 0;
            for route in &routes {
                // Service only the depth seen at the start of this pass
                let pending = self.queues[route.queue_index].len();
                for _ in 0..pending {
                    let Some(payload) = self.queues[route.queue_index].pop_front() else {
                        break;
                    };
                    for dest in &route.dests {
                        if self.syms.is_output(dest) {
                            self.drain(&route.frequency, &payload)?;
                        } else if let Some(entry) = self
                            .handlers
                            .get(&(dest.clone(), route.frequency.clone()))
                            .cloned()
                        {
                            let hyphal = self.hyphal_of[dest].clone();
                            let mut act = Activation::new(
                                dest.clone(),
                                hyphal,
                                Some((entry.binding.clone(), Rc::clone(&payload))),
                            );
                            if let Some(guard) = &entry.guard
                                && !self.eval_expr(&mut act, guard)?.truthy()
                            {
                                continue;
                            }
                            self.exec_stmts(&mut act, &entry.body)?;
                        }
                    }
                    processed += 1;
                }
            }
            if processed == 0 {
                break;
            }
        }
        self.cycles_used = cycle;
        Ok(())
    }

    /// Route an emission to its (source, frequency) queue; emissions with
    /// no socket are silently dropped. A full ring is fatal, mirroring the
    /// generated overflow stub.
    pub(crate) fn enqueue_emission(
        &mut self,
        agent: &str,
        frequency: &str,
        payload: Rc<Payload>,
    ) -> Result<(), String> {
        let Some(route) = self.syms.route(agent, frequency) else {
            return Ok(());
        };
        let index = route.queue_index;
        if self.queues[index].len() as u64 >= self.syms.queue_capacity - 1 {
            return Err("fatal: signal queue overflow".to_string());
        }
        self.queues[index].push_back(payload);
        Ok(())
    }

    /// The documented drain format: prefix, string fields in declaration
    /// order (or integer fields when there are none), space separated,
    /// newline.
    fn drain(&mut self, frequency: &str, payload: &Payload) -> Result<(), String> {
        use crate::ast::Prim;
        let layout = self.syms.frequency(frequency).unwrap().clone();
        let fields = payload.fields.borrow();

        let string_fields: Vec<_> = layout
            .fields
            .iter()
            .filter(|f| f.ty == TypeRef::Prim(Prim::Str))
            .collect();
        let printed: Vec<_> = if string_fields.is_empty() {
            layout.fields.iter().collect()
        } else {
            string_fields
        };

        let mut line = String::from("OUTPUT: ");
        for (i, slot) in printed.iter().enumerate() {
            if i > 0 {
                line.push(' ');
            }
            let value = fields.get(&slot.name).cloned().unwrap_or(Value::Int(0));
            line.push_str(&value.to_string());
        }
        self.output.push_str(&line);
        self.output.push('\n');
        self.drained.push(line);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Everything written to the host output stream, prints included.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// The drained output-fruiting-body lines, in order, without newlines.
    pub fn drained(&self) -> &[String] {
        &self.drained
    }

    pub fn state_value(&self, agent: &str, field: &str) -> Option<Value> {
        self.states.get(agent).and_then(|s| s.get(field)).cloned()
    }

    /// Report entries retained per agent, in emission order.
    pub fn reports_for(&self, agent: &str) -> &[(String, Value)] {
        self.reports.get(agent).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn cycles_used(&self) -> u64 {
        self.cycles_used
    }

    pub fn hit_max_cycles(&self) -> bool {
        self.hit_max_cycles
    }
}
