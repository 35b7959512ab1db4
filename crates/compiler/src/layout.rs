//! Symbol table and memory layout
//!
//! Canonicalizes a parsed [`Network`] into the model every downstream
//! consumer (code generator and reference evaluator) reads:
//!
//! - frequency and struct layouts under natural-alignment packing, sizes
//!   rounded up to 8 bytes
//! - enum layouts as 16-byte tagged unions with dense ordinals in
//!   declaration order
//! - one contiguous state region per spawned agent at a stable offset
//! - the routing table keyed by (source, frequency), broadcast `*`
//!   expanded to the full spawn list, one FIFO queue index per key
//! - handler/rule labels for the generated artifact
//!
//! All offsets and sizes are computed exactly once here; consumers are
//! read-only.

use crate::ast::{EnumDef, Network, SocketDest, TypeDef, TypeRef};
use crate::config::CompilerConfig;
use std::collections::HashSet;

/// A laid-out field: name, declared type, byte offset, storage size.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSlot {
    pub name: String,
    pub ty: TypeRef,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyLayout {
    pub name: String,
    pub fields: Vec<FieldSlot>,
    pub size: u64,
}

impl FrequencyLayout {
    pub fn field(&self, name: &str) -> Option<&FieldSlot> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructLayout {
    pub name: String,
    pub fields: Vec<FieldSlot>,
    pub size: u64,
}

impl StructLayout {
    pub fn field(&self, name: &str) -> Option<&FieldSlot> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Tagged-union layout: ordinal tag at offset 0, payload slot at offset 8.
/// Every enum value is a 16-byte heap cell, data-less variants included.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumLayout {
    pub name: String,
    pub variants: Vec<(String, Option<TypeRef>)>,
    pub size: u64,
}

/// Byte offset of the variant tag within an enum cell.
pub const ENUM_TAG_OFFSET: u64 = 0;
/// Byte offset of the payload slot within an enum cell.
pub const ENUM_PAYLOAD_OFFSET: u64 = 8;
/// Size of every enum cell.
pub const ENUM_CELL_SIZE: u64 = 16;

impl EnumLayout {
    pub fn ordinal(&self, variant: &str) -> Option<u64> {
        self.variants
            .iter()
            .position(|(name, _)| name == variant)
            .map(|i| i as u64)
    }

    pub fn payload_type(&self, variant: &str) -> Option<&TypeRef> {
        self.variants
            .iter()
            .find(|(name, _)| name == variant)
            .and_then(|(_, inner)| inner.as_ref())
    }
}

/// A spawned agent instance with its state region.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentInstance {
    pub id: String,
    pub hyphal: String,
    /// Offset of this instance's region within the global state table
    pub state_offset: u64,
    pub state_size: u64,
    pub state_fields: Vec<FieldSlot>,
}

impl AgentInstance {
    pub fn state_field(&self, name: &str) -> Option<&FieldSlot> {
        self.state_fields.iter().find(|f| f.name == name)
    }
}

/// A collapsed routing edge: all destinations for one (source, frequency)
/// key, in socket declaration order. Each route owns one FIFO queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub source: String,
    pub frequency: String,
    pub dests: Vec<String>,
    pub queue_index: usize,
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    pub network_name: String,
    pub frequencies: Vec<FrequencyLayout>,
    pub structs: Vec<StructLayout>,
    pub enums: Vec<EnumLayout>,
    pub agents: Vec<AgentInstance>,
    pub routes: Vec<Route>,
    /// Fruiting bodies that only appear as socket sources
    pub inputs: Vec<String>,
    /// Fruiting bodies that only appear as socket destinations
    pub outputs: Vec<String>,
    /// Total size of the agent-state table
    pub state_total: u64,
    pub max_cycles: u64,
    pub arena_size: u64,
    pub queue_capacity: u64,
}

impl SymbolTable {
    pub fn frequency(&self, name: &str) -> Option<&FrequencyLayout> {
        self.frequencies.iter().find(|f| f.name == name)
    }

    pub fn struct_layout(&self, name: &str) -> Option<&StructLayout> {
        self.structs.iter().find(|s| s.name == name)
    }

    pub fn enum_layout(&self, name: &str) -> Option<&EnumLayout> {
        self.enums.iter().find(|e| e.name == name)
    }

    pub fn agent(&self, id: &str) -> Option<&AgentInstance> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn route(&self, source: &str, frequency: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|r| r.source == source && r.frequency == frequency)
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }

    pub fn is_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|i| i == name)
    }

    // Label conventions for the generated artifact. Codegen and tests both
    // go through these so the two can never drift.

    pub fn handler_label(agent: &str, frequency: &str) -> String {
        format!("handler_{}_{}", agent, frequency)
    }

    pub fn rest_label(agent: &str) -> String {
        format!("rest_{}", agent)
    }

    pub fn cycle_label(agent: &str, number: u64) -> String {
        format!("cycle_{}_{}", agent, number)
    }

    pub fn rule_label(agent: &str, rule: &str) -> String {
        format!("rule_{}_{}", agent, rule)
    }

    pub fn queue_label(index: usize) -> String {
        format!("queue_{}", index)
    }
}

/// Storage size of a field of type `ty`. Scalars use their natural width;
/// everything pointer-shaped (string, vec, map, queue, struct, enum) is an
/// 8-byte address.
pub fn field_size(ty: &TypeRef) -> u64 {
    match ty {
        TypeRef::Prim(p) => p.size(),
        TypeRef::Named(_) | TypeRef::Vec(_) | TypeRef::Map(_, _) | TypeRef::Queue(_) => 8,
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

/// Natural-alignment packing: each field is aligned to its own size, the
/// total is rounded up to an 8-byte multiple.
fn layout_fields(fields: &[(String, TypeRef)]) -> (Vec<FieldSlot>, u64) {
    let mut slots = Vec::with_capacity(fields.len());
    let mut offset = 0u64;
    for (name, ty) in fields {
        let size = field_size(ty);
        offset = round_up(offset, size);
        slots.push(FieldSlot {
            name: name.clone(),
            ty: ty.clone(),
            offset,
            size,
        });
        offset += size;
    }
    (slots, round_up(offset, 8))
}

/// Build the symbol model for a parsed network.
pub fn build(network: &Network, config: &CompilerConfig) -> Result<SymbolTable, String> {
    let mut config = config.clone();
    config.apply_network_overrides(&network.config)?;

    check_unique(
        network.frequencies.iter().map(|f| f.name.as_str()),
        "frequency",
    )?;
    check_unique(network.types.iter().map(|t| t.name()), "type")?;
    check_unique(network.hyphae.iter().map(|h| h.name.as_str()), "hyphal")?;
    check_unique(
        network.topology.fruiting_bodies.iter().map(String::as_str),
        "fruiting body",
    )?;
    check_unique(
        network.topology.spawns.iter().map(|s| s.id.as_str()),
        "agent instance",
    )?;

    let type_names: HashSet<&str> = network.types.iter().map(|t| t.name()).collect();
    let check_type = |ty: &TypeRef, context: &str| check_type_refs(ty, &type_names, context);

    // Frequency layouts
    let mut frequencies = Vec::new();
    for freq in &network.frequencies {
        let pairs: Vec<(String, TypeRef)> = freq
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.ty.clone()))
            .collect();
        for (_, ty) in &pairs {
            check_type(ty, &format!("frequency '{}'", freq.name))?;
        }
        let (fields, size) = layout_fields(&pairs);
        frequencies.push(FrequencyLayout {
            name: freq.name.clone(),
            fields,
            size,
        });
    }

    // Struct and enum layouts
    let mut structs = Vec::new();
    let mut enums = Vec::new();
    for type_def in &network.types {
        match type_def {
            TypeDef::Struct(s) => {
                let pairs: Vec<(String, TypeRef)> = s
                    .fields
                    .iter()
                    .map(|f| (f.name.clone(), f.ty.clone()))
                    .collect();
                for (_, ty) in &pairs {
                    check_type(ty, &format!("struct '{}'", s.name))?;
                }
                let (fields, size) = layout_fields(&pairs);
                structs.push(StructLayout {
                    name: s.name.clone(),
                    fields,
                    size,
                });
            }
            TypeDef::Enum(e) => enums.push(enum_layout(e)),
        }
    }

    // Agent state regions, in spawn order
    let mut agents = Vec::new();
    let mut state_total = 0u64;
    for spawn in &network.topology.spawns {
        let hyphal = network
            .find_hyphal(&spawn.hyphal)
            .ok_or_else(|| format!("spawn '{}': unknown hyphal type '{}'", spawn.id, spawn.hyphal))?;
        let pairs: Vec<(String, TypeRef)> = hyphal
            .state
            .iter()
            .map(|f| (f.name.clone(), f.ty.clone()))
            .collect();
        for (_, ty) in &pairs {
            check_type(ty, &format!("hyphal '{}' state", hyphal.name))?;
        }
        let (state_fields, state_size) = layout_fields(&pairs);
        agents.push(AgentInstance {
            id: spawn.id.clone(),
            hyphal: spawn.hyphal.clone(),
            state_offset: state_total,
            state_size,
            state_fields,
        });
        state_total += state_size;
    }

    // Handlers must reference declared frequencies
    for hyphal in &network.hyphae {
        for handler in &hyphal.handlers {
            if let crate::ast::Handler::Signal { frequency, .. } = handler
                && network.find_frequency(frequency).is_none()
            {
                return Err(format!(
                    "hyphal '{}': signal handler for unknown frequency '{}'",
                    hyphal.name, frequency
                ));
            }
        }
    }

    // Routing table: collapse sockets by (source, frequency), preserving
    // declaration order, expanding `*` to the spawn list.
    let spawn_ids: Vec<String> = network
        .topology
        .spawns
        .iter()
        .map(|s| s.id.clone())
        .collect();
    let fb_names: HashSet<&str> = network
        .topology
        .fruiting_bodies
        .iter()
        .map(String::as_str)
        .collect();
    let mut routes: Vec<Route> = Vec::new();
    let mut source_fbs: Vec<String> = Vec::new();
    let mut dest_fbs: Vec<String> = Vec::new();

    for socket in &network.topology.sockets {
        let source_is_agent = spawn_ids.iter().any(|id| id == &socket.source);
        let source_is_fb = fb_names.contains(socket.source.as_str());
        if !source_is_agent && !source_is_fb {
            return Err(format!(
                "socket source '{}' is neither a spawned agent nor a fruiting body",
                socket.source
            ));
        }
        if network.find_frequency(&socket.frequency).is_none() {
            return Err(format!(
                "socket references unknown frequency '{}'",
                socket.frequency
            ));
        }
        let dests: Vec<String> = match &socket.dest {
            SocketDest::Broadcast => spawn_ids.clone(),
            SocketDest::Named(name) => {
                let dest_is_agent = spawn_ids.iter().any(|id| id == name);
                let dest_is_fb = fb_names.contains(name.as_str());
                if !dest_is_agent && !dest_is_fb {
                    return Err(format!(
                        "socket destination '{}' is neither a spawned agent nor a fruiting body",
                        name
                    ));
                }
                if dest_is_fb && !dest_fbs.contains(name) {
                    dest_fbs.push(name.clone());
                }
                vec![name.clone()]
            }
        };
        if source_is_fb && !source_fbs.contains(&socket.source) {
            source_fbs.push(socket.source.clone());
        }

        match routes
            .iter_mut()
            .find(|r| r.source == socket.source && r.frequency == socket.frequency)
        {
            Some(route) => route.dests.extend(dests),
            None => {
                let queue_index = routes.len();
                routes.push(Route {
                    source: socket.source.clone(),
                    frequency: socket.frequency.clone(),
                    dests,
                    queue_index,
                });
            }
        }
    }

    // A fruiting body on both ends of the topology has no defined direction
    for fb in &source_fbs {
        if dest_fbs.contains(fb) {
            return Err(format!(
                "fruiting body '{}' is used as both a signal source and a sink",
                fb
            ));
        }
    }

    Ok(SymbolTable {
        network_name: network.name.clone(),
        frequencies,
        structs,
        enums,
        agents,
        routes,
        inputs: source_fbs,
        outputs: dest_fbs,
        state_total: round_up(state_total, 8),
        max_cycles: config.max_cycles,
        arena_size: config.arena_size,
        queue_capacity: config.queue_capacity,
    })
}

fn enum_layout(def: &EnumDef) -> EnumLayout {
    EnumLayout {
        name: def.name.clone(),
        variants: def
            .variants
            .iter()
            .map(|v| (v.name.clone(), v.inner.clone()))
            .collect(),
        size: ENUM_CELL_SIZE,
    }
}

fn check_unique<'a>(
    names: impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<(), String> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(format!("duplicate {} name '{}'", what, name));
        }
    }
    Ok(())
}

fn check_type_refs(
    ty: &TypeRef,
    type_names: &HashSet<&str>,
    context: &str,
) -> Result<(), String> {
    match ty {
        TypeRef::Prim(_) => Ok(()),
        TypeRef::Named(name) => {
            if type_names.contains(name.as_str()) {
                Ok(())
            } else {
                Err(format!("{}: unknown type '{}'", context, name))
            }
        }
        TypeRef::Vec(inner) | TypeRef::Queue(inner) => {
            check_type_refs(inner, type_names, context)
        }
        TypeRef::Map(key, value) => {
            check_type_refs(key, type_names, context)?;
            check_type_refs(value, type_names, context)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_network;

    fn build_network(source: &str) -> SymbolTable {
        let network = parse_network(source).expect("parse failed");
        build(&network, &CompilerConfig::default()).expect("layout failed")
    }

    #[test]
    fn test_frequency_natural_alignment() {
        let syms = build_network(
            "network L {\n  frequencies { frequency f { a: u8, b: u32, c: u8, d: u64, e: string } }\n  hyphae { hyphal A { } }\n  topology { spawn A a }\n}",
        );
        let freq = syms.frequency("f").unwrap();
        let offsets: Vec<u64> = freq.fields.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8, 16, 24]);
        assert_eq!(freq.size, 32);
        // Offsets monotone, each naturally aligned
        for field in &freq.fields {
            assert_eq!(field.offset % field.size, 0);
        }
    }

    #[test]
    fn test_struct_size_rounded_to_eight() {
        let syms = build_network(
            "network L {\n  types { struct P { a: u8, b: u8 } struct Q { a: u64, b: u8 } }\n  hyphae { hyphal A { } }\n  topology { spawn A a }\n}",
        );
        let p = syms.struct_layout("P").unwrap();
        assert_eq!(p.size, 8);
        let q = syms.struct_layout("Q").unwrap();
        assert_eq!(q.size, 16);
        for s in [p, q] {
            let field_sum: u64 = s.fields.iter().map(|f| f.size).sum();
            assert!(field_sum <= s.size && s.size <= field_sum + 7);
            assert_eq!(s.size % 8, 0);
        }
    }

    #[test]
    fn test_enum_ordinals_dense() {
        let syms = build_network(
            "network L {\n  types { enum Shape { Circle(u32), Square(u32), Empty } }\n  hyphae { hyphal A { } }\n  topology { spawn A a }\n}",
        );
        let e = syms.enum_layout("Shape").unwrap();
        assert_eq!(e.size, ENUM_CELL_SIZE);
        assert_eq!(e.ordinal("Circle"), Some(0));
        assert_eq!(e.ordinal("Square"), Some(1));
        assert_eq!(e.ordinal("Empty"), Some(2));
        assert!(e.payload_type("Empty").is_none());
        assert!(e.payload_type("Circle").is_some());
    }

    #[test]
    fn test_agent_state_regions() {
        let syms = build_network(
            "network L {\n  hyphae { hyphal C { state { count: u32, label: string } } }\n  topology { spawn C c1 spawn C c2 }\n}",
        );
        let c1 = syms.agent("c1").unwrap();
        let c2 = syms.agent("c2").unwrap();
        assert_eq!(c1.state_offset, 0);
        assert_eq!(c1.state_size, 16); // u32 @0, string @8
        assert_eq!(c2.state_offset, 16);
        assert_eq!(c1.state_field("label").unwrap().offset, 8);
        assert_eq!(syms.state_total, 32);
    }

    #[test]
    fn test_broadcast_expands_to_spawn_order() {
        let syms = build_network(
            "network L {\n  frequencies { frequency step { n: i64 } }\n  hyphae { hyphal W { } }\n  topology { spawn W w1 spawn W w2 spawn W w3 socket w1 -[step]-> * }\n}",
        );
        let route = syms.route("w1", "step").unwrap();
        assert_eq!(route.dests, vec!["w1", "w2", "w3"]);
    }

    #[test]
    fn test_routes_collapse_in_declaration_order() {
        let syms = build_network(
            "network L {\n  frequencies { frequency a { n: i64 } frequency b { n: i64 } }\n  hyphae { hyphal X { } }\n  topology {\n    fruiting_body out\n    spawn X x1 spawn X x2\n    socket x1 -[b]-> x2\n    socket x1 -[a]-> x2\n    socket x1 -[b]-> out\n  }\n}",
        );
        assert_eq!(syms.routes.len(), 2);
        assert_eq!(syms.routes[0].frequency, "b");
        assert_eq!(syms.routes[0].queue_index, 0);
        assert_eq!(syms.routes[0].dests, vec!["x2", "out"]);
        assert_eq!(syms.routes[1].frequency, "a");
        assert!(syms.is_output("out"));
    }

    #[test]
    fn test_input_output_inference() {
        let syms = build_network(
            "network L {\n  frequencies { frequency f { n: i64 } frequency g { n: i64 } }\n  hyphae { hyphal X { } }\n  topology {\n    fruiting_body src\n    fruiting_body sink\n    spawn X x1\n    socket src -[f]-> x1\n    socket x1 -[g]-> sink\n  }\n}",
        );
        assert_eq!(syms.inputs, vec!["src"]);
        assert_eq!(syms.outputs, vec!["sink"]);
    }

    #[test]
    fn test_fruiting_body_both_directions_rejected() {
        let network = parse_network(
            "network L {\n  frequencies { frequency f { n: i64 } }\n  hyphae { hyphal X { } }\n  topology {\n    fruiting_body io\n    spawn X x1\n    socket io -[f]-> x1\n    socket x1 -[f]-> io\n  }\n}",
        )
        .unwrap();
        let err = build(&network, &CompilerConfig::default()).unwrap_err();
        assert!(err.contains("both a signal source and a sink"));
    }

    #[test]
    fn test_unknown_entities_rejected() {
        let bad_spawn = parse_network(
            "network L { topology { spawn Ghost g } }",
        )
        .unwrap();
        assert!(build(&bad_spawn, &CompilerConfig::default())
            .unwrap_err()
            .contains("unknown hyphal type"));

        let bad_socket = parse_network(
            "network L {\n  frequencies { frequency f { n: i64 } }\n  hyphae { hyphal X { } }\n  topology { spawn X x1 socket x1 -[f]-> nowhere }\n}",
        )
        .unwrap();
        assert!(build(&bad_socket, &CompilerConfig::default())
            .unwrap_err()
            .contains("destination 'nowhere'"));

        let bad_freq = parse_network(
            "network L {\n  hyphae { hyphal X { on signal(ghost, g) { } } }\n  topology { spawn X x1 }\n}",
        )
        .unwrap();
        assert!(build(&bad_freq, &CompilerConfig::default())
            .unwrap_err()
            .contains("unknown frequency 'ghost'"));
    }

    #[test]
    fn test_layout_deterministic() {
        let source = "network L {\n  frequencies { frequency f { a: u8, b: u64 } }\n  types { struct S { x: i32, y: string } enum E { A, B(i64) } }\n  hyphae { hyphal X { state { n: u32 } } }\n  topology { spawn X x1 spawn X x2 }\n}";
        let network = parse_network(source).unwrap();
        let first = build(&network, &CompilerConfig::default()).unwrap();
        let second = build(&network, &CompilerConfig::default()).unwrap();
        assert_eq!(first.frequencies, second.frequencies);
        assert_eq!(first.structs, second.structs);
        assert_eq!(first.enums, second.enums);
        assert_eq!(
            first.agents.iter().map(|a| a.state_offset).collect::<Vec<_>>(),
            second.agents.iter().map(|a| a.state_offset).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_config_block_overrides() {
        let syms = build_network(
            "network L {\n  config { max_cycles: 42 }\n  hyphae { hyphal X { } }\n  topology { spawn X x1 }\n}",
        );
        assert_eq!(syms.max_cycles, 42);
        assert_eq!(syms.arena_size, crate::config::DEFAULT_ARENA_SIZE);
    }
}
