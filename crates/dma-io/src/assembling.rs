//! Assembling database: the association/automaton configuration.
//!
//! Loads the assembling XML document once, validates its structure and
//! answers point lookups for the selection algorithms. The load is
//! all-or-nothing: either the database is fully populated or the whole
//! load fails. A missing document is not an error — it means no assembling
//! was requested and the database behaves as empty.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use dma_core::error::ReferenceKind;
use dma_core::{AssemblyError, AssemblyResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::LocalName;
use quick_xml::Reader;

use crate::schema::DocumentSchema;

/// Library name marking an automaton as coordinated voltage control.
pub const SVC_MODEL_LIB: &str = "SecondaryVoltageControl";

/// One wired variable pair of a macro connection template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarPair {
    pub var1: String,
    pub var2: String,
}

/// Reusable wiring template: which variables get connected, independent of
/// the physical instances. Zero pairs is legal and produces no wiring.
#[derive(Debug, Clone, Default)]
pub struct MacroConnection {
    pub id: String,
    pub connections: Vec<VarPair>,
}

/// Bus target of a single association (keyed by voltage level).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusTarget {
    pub voltage_level: String,
}

/// Named element target of a single association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedTarget {
    pub name: String,
}

/// A named binding from a logical role to exactly one target kind.
#[derive(Debug, Clone, Default)]
pub struct SingleAssociation {
    pub id: String,
    pub bus: Option<BusTarget>,
    pub line: Option<NamedTarget>,
    pub tfo: Option<NamedTarget>,
    pub shunt: Option<NamedTarget>,
    pub generators: Vec<NamedTarget>,
}

impl SingleAssociation {
    fn populated_target_kinds(&self) -> usize {
        usize::from(self.bus.is_some())
            + usize::from(self.line.is_some())
            + usize::from(self.tfo.is_some())
            + usize::from(self.shunt.is_some())
            + usize::from(!self.generators.is_empty())
    }
}

/// Shunt group of a multiple association: every shunt of a voltage level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipleShunts {
    pub voltage_level: String,
}

/// A named binding from a logical role to a set of shunts.
#[derive(Debug, Clone, Default)]
pub struct MultipleAssociation {
    pub id: String,
    pub shunts: MultipleShunts,
}

/// One wiring intent of an automaton: apply template `macro_connection` to
/// the association `association_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroConnect {
    pub macro_connection: String,
    pub association_id: String,
}

/// One independently configured behavioral model plus its wiring intents.
#[derive(Debug, Clone, Default)]
pub struct DynamicAutomaton {
    pub id: String,
    pub lib: String,
    pub macro_connects: Vec<MacroConnect>,
}

impl DynamicAutomaton {
    /// Whether the automaton centrally coordinates voltage control.
    pub fn is_svc(&self) -> bool {
        self.lib == SVC_MODEL_LIB
    }
}

/// Parsed and validated assembling configuration.
#[derive(Debug, Clone, Default)]
pub struct AssemblingDatabase {
    macro_connections: HashMap<String, MacroConnection>,
    single_associations: HashMap<String, SingleAssociation>,
    multiple_associations: HashMap<String, MultipleAssociation>,
    // ordered so automaton expansion is deterministic
    dynamic_automatons: BTreeMap<String, DynamicAutomaton>,
    generator_to_association: HashMap<String, String>,
    contains_svc: bool,
}

impl AssemblingDatabase {
    /// A database with no entries: all lookups miss, no automatons exist.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load from a file. A missing file yields the empty database; any
    /// other failure is fatal.
    pub fn from_file(path: &Path) -> AssemblyResult<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "assembling file not found, no assembling requested");
                return Ok(Self::empty());
            }
            Err(err) => return Err(AssemblyError::Io(err)),
        };
        let schema = DocumentSchema::locate(path);
        if schema.is_none() {
            tracing::warn!(path = %path.display(), "no schema sidecar found, structural validation relaxed");
        }
        parse(&text, schema.as_ref())
    }

    /// Parse from a string, validating against the built-in grammar.
    pub fn from_str(source: &str) -> AssemblyResult<Self> {
        parse(source, Some(&DocumentSchema::builtin()))
    }

    pub fn get_macro_connection(&self, id: &str) -> AssemblyResult<&MacroConnection> {
        self.macro_connections
            .get(id)
            .ok_or_else(|| AssemblyError::unknown(ReferenceKind::MacroConnection, id))
    }

    pub fn get_single_association(&self, id: &str) -> AssemblyResult<&SingleAssociation> {
        self.single_associations
            .get(id)
            .ok_or_else(|| AssemblyError::unknown(ReferenceKind::SingleAssociation, id))
    }

    pub fn get_multiple_association(&self, id: &str) -> AssemblyResult<&MultipleAssociation> {
        self.multiple_associations
            .get(id)
            .ok_or_else(|| AssemblyError::unknown(ReferenceKind::MultipleAssociation, id))
    }

    pub fn is_single_association(&self, id: &str) -> bool {
        self.single_associations.contains_key(id)
    }

    pub fn is_multiple_association(&self, id: &str) -> bool {
        self.multiple_associations.contains_key(id)
    }

    /// Owning single-association id for a generator name. Misses are
    /// expected for generators outside the assembling scope.
    pub fn generator_association_id(&self, generator_name: &str) -> Option<&str> {
        self.generator_to_association
            .get(generator_name)
            .map(String::as_str)
    }

    /// Declared automatons, ordered by id.
    pub fn dynamic_automatons(&self) -> &BTreeMap<String, DynamicAutomaton> {
        &self.dynamic_automatons
    }

    /// Whether any automaton uses the coordinated-voltage-control library.
    pub fn contains_svc(&self) -> bool {
        self.contains_svc
    }
}

fn attribute_value(event: &BytesStart, key: &str) -> AssemblyResult<Option<String>> {
    for attr in event.attributes().with_checks(false) {
        let attr = attr.map_err(|e| AssemblyError::Xml(e.to_string()))?;
        if let Ok(name) = std::str::from_utf8(attr.key.local_name().as_ref()) {
            if name == key {
                let value = attr
                    .unescape_value()
                    .map_err(|e| AssemblyError::Xml(e.to_string()))?;
                return Ok(Some(value.into_owned()));
            }
        }
    }
    Ok(None)
}

fn required_attribute(event: &BytesStart, element: &str, key: &str) -> AssemblyResult<String> {
    attribute_value(event, key)?.ok_or_else(|| {
        AssemblyError::MalformedConfig(format!(
            "element '{}' is missing required attribute '{}'",
            element, key
        ))
    })
}

fn local_name_as_str<'a>(name: &'a LocalName<'a>) -> &'a str {
    std::str::from_utf8(name.as_ref()).unwrap_or_default()
}

fn check_against_schema(
    schema: Option<&DocumentSchema>,
    event: &BytesStart,
    tag: &str,
    parent: Option<&str>,
) -> AssemblyResult<()> {
    let Some(schema) = schema else {
        return Ok(());
    };
    if !schema.knows_element(tag) {
        return Err(AssemblyError::MalformedConfig(format!(
            "unexpected element '{}'",
            tag
        )));
    }
    if let Some(parent) = parent {
        if !schema.allows_child(parent, tag) {
            return Err(AssemblyError::MalformedConfig(format!(
                "element '{}' not allowed inside '{}'",
                tag, parent
            )));
        }
    }
    for attr in event.attributes().with_checks(false) {
        let attr = attr.map_err(|e| AssemblyError::Xml(e.to_string()))?;
        if let Ok(name) = std::str::from_utf8(attr.key.local_name().as_ref()) {
            // namespace declarations are not grammar attributes
            if name == "xmlns" || attr.key.as_ref().starts_with(b"xmlns:") {
                continue;
            }
            if !schema.allows_attribute(tag, name) {
                return Err(AssemblyError::MalformedConfig(format!(
                    "unexpected attribute '{}' on element '{}'",
                    name, tag
                )));
            }
        }
    }
    Ok(())
}

fn parse(source: &str, schema: Option<&DocumentSchema>) -> AssemblyResult<AssemblingDatabase> {
    let mut reader = Reader::from_str(source);
    reader.trim_text(true);

    let mut db = AssemblingDatabase::default();

    let mut current_macro_connection: Option<MacroConnection> = None;
    let mut current_single: Option<SingleAssociation> = None;
    let mut current_multiple: Option<(String, Option<MultipleShunts>)> = None;
    let mut current_automaton: Option<DynamicAutomaton> = None;
    let mut open_elements: Vec<String> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| AssemblyError::Xml(e.to_string()))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let name = e.local_name();
                let tag = local_name_as_str(&name);
                check_against_schema(schema, e, tag, open_elements.last().map(String::as_str))?;
                let self_closing = matches!(event, Event::Empty(_));
                if !self_closing {
                    open_elements.push(tag.to_string());
                }
                match tag {
                    "assembling" => {}
                    "macroConnection" => {
                        let template = MacroConnection {
                            id: required_attribute(e, tag, "id")?,
                            connections: Vec::new(),
                        };
                        if self_closing {
                            commit_macro_connection(&mut db, template)?;
                        } else {
                            current_macro_connection = Some(template);
                        }
                    }
                    "connection" => {
                        let pair = VarPair {
                            var1: required_attribute(e, tag, "var1")?,
                            var2: required_attribute(e, tag, "var2")?,
                        };
                        match current_macro_connection.as_mut() {
                            Some(template) => template.connections.push(pair),
                            None => {
                                return Err(AssemblyError::MalformedConfig(
                                    "'connection' outside of 'macroConnection'".into(),
                                ))
                            }
                        }
                    }
                    "singleAssociation" => {
                        let assoc = SingleAssociation {
                            id: required_attribute(e, tag, "id")?,
                            ..SingleAssociation::default()
                        };
                        if self_closing {
                            commit_single_association(&mut db, assoc)?;
                        } else {
                            current_single = Some(assoc);
                        }
                    }
                    "bus" => {
                        let target = BusTarget {
                            voltage_level: required_attribute(e, tag, "voltageLevel")?,
                        };
                        match current_single.as_mut() {
                            Some(assoc) => assoc.bus = Some(target),
                            None => {
                                return Err(AssemblyError::MalformedConfig(
                                    "'bus' outside of 'singleAssociation'".into(),
                                ))
                            }
                        }
                    }
                    "line" => match current_single.as_mut() {
                        Some(assoc) => {
                            assoc.line = Some(NamedTarget {
                                name: required_attribute(e, tag, "name")?,
                            })
                        }
                        None => {
                            return Err(AssemblyError::MalformedConfig(
                                "'line' outside of 'singleAssociation'".into(),
                            ))
                        }
                    },
                    "tfo" => match current_single.as_mut() {
                        Some(assoc) => {
                            assoc.tfo = Some(NamedTarget {
                                name: required_attribute(e, tag, "name")?,
                            })
                        }
                        None => {
                            return Err(AssemblyError::MalformedConfig(
                                "'tfo' outside of 'singleAssociation'".into(),
                            ))
                        }
                    },
                    // name-keyed under a single association, voltage-level-keyed
                    // under a multiple association
                    "shunt" => {
                        if let Some(assoc) = current_single.as_mut() {
                            assoc.shunt = Some(NamedTarget {
                                name: required_attribute(e, tag, "name")?,
                            });
                        } else if let Some((_, shunts)) = current_multiple.as_mut() {
                            *shunts = Some(MultipleShunts {
                                voltage_level: required_attribute(e, tag, "voltageLevel")?,
                            });
                        } else {
                            return Err(AssemblyError::MalformedConfig(
                                "'shunt' outside of any association".into(),
                            ));
                        }
                    }
                    "generator" => match current_single.as_mut() {
                        Some(assoc) => assoc.generators.push(NamedTarget {
                            name: required_attribute(e, tag, "name")?,
                        }),
                        None => {
                            return Err(AssemblyError::MalformedConfig(
                                "'generator' outside of 'singleAssociation'".into(),
                            ))
                        }
                    },
                    "multipleAssociation" => {
                        let id = required_attribute(e, tag, "id")?;
                        if self_closing {
                            commit_multiple_association(&mut db, id, None)?;
                        } else {
                            current_multiple = Some((id, None));
                        }
                    }
                    "dynamicAutomaton" => {
                        let automaton = DynamicAutomaton {
                            id: required_attribute(e, tag, "id")?,
                            lib: required_attribute(e, tag, "lib")?,
                            macro_connects: Vec::new(),
                        };
                        if self_closing {
                            commit_automaton(&mut db, automaton)?;
                        } else {
                            current_automaton = Some(automaton);
                        }
                    }
                    "macroConnect" => {
                        let request = MacroConnect {
                            macro_connection: required_attribute(e, tag, "macroConnection")?,
                            association_id: required_attribute(e, tag, "id")?,
                        };
                        match current_automaton.as_mut() {
                            Some(automaton) => automaton.macro_connects.push(request),
                            None => {
                                return Err(AssemblyError::MalformedConfig(
                                    "'macroConnect' outside of 'dynamicAutomaton'".into(),
                                ))
                            }
                        }
                    }
                    other => {
                        // lenient mode only: strict mode rejected it above
                        tracing::warn!(element = other, "skipping unknown element");
                    }
                }
            }
            Event::End(ref e) => {
                open_elements.pop();
                let name = e.local_name();
                match local_name_as_str(&name) {
                    "macroConnection" => {
                        if let Some(template) = current_macro_connection.take() {
                            commit_macro_connection(&mut db, template)?;
                        }
                    }
                    "singleAssociation" => {
                        if let Some(assoc) = current_single.take() {
                            commit_single_association(&mut db, assoc)?;
                        }
                    }
                    "multipleAssociation" => {
                        if let Some((id, shunts)) = current_multiple.take() {
                            commit_multiple_association(&mut db, id, shunts)?;
                        }
                    }
                    "dynamicAutomaton" => {
                        if let Some(automaton) = current_automaton.take() {
                            commit_automaton(&mut db, automaton)?;
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(db)
}

fn commit_macro_connection(
    db: &mut AssemblingDatabase,
    template: MacroConnection,
) -> AssemblyResult<()> {
    let id = template.id.clone();
    if db.macro_connections.insert(id.clone(), template).is_some() {
        return Err(AssemblyError::MalformedConfig(format!(
            "duplicate macro connection id '{}'",
            id
        )));
    }
    Ok(())
}

fn commit_single_association(
    db: &mut AssemblingDatabase,
    assoc: SingleAssociation,
) -> AssemblyResult<()> {
    if assoc.populated_target_kinds() > 1 {
        return Err(AssemblyError::MalformedConfig(format!(
            "single association '{}' declares more than one target kind",
            assoc.id
        )));
    }
    let id = assoc.id.clone();
    for generator in &assoc.generators {
        db.generator_to_association
            .insert(generator.name.clone(), id.clone());
    }
    if db.single_associations.insert(id.clone(), assoc).is_some() {
        return Err(AssemblyError::MalformedConfig(format!(
            "duplicate single association id '{}'",
            id
        )));
    }
    Ok(())
}

fn commit_multiple_association(
    db: &mut AssemblingDatabase,
    id: String,
    shunts: Option<MultipleShunts>,
) -> AssemblyResult<()> {
    let shunts = shunts.ok_or_else(|| {
        AssemblyError::MalformedConfig(format!(
            "multiple association '{}' declares no shunt group",
            id
        ))
    })?;
    if db
        .multiple_associations
        .insert(id.clone(), MultipleAssociation { id: id.clone(), shunts })
        .is_some()
    {
        return Err(AssemblyError::MalformedConfig(format!(
            "duplicate multiple association id '{}'",
            id
        )));
    }
    Ok(())
}

fn commit_automaton(db: &mut AssemblingDatabase, automaton: DynamicAutomaton) -> AssemblyResult<()> {
    if automaton.is_svc() {
        db.contains_svc = true;
    }
    let id = automaton.id.clone();
    if db.dynamic_automatons.insert(id.clone(), automaton).is_some() {
        return Err(AssemblyError::MalformedConfig(format!(
            "duplicate automaton id '{}'",
            id
        )));
    }
    Ok(())
}
