//! Ordered uniform schemas, the live uniform state, and the packer that turns
//! the two into the bytes uploaded to the GPU.
//!
//! The schema's declaration order is the only thing that decides byte
//! offsets. [`UniformState`] is a plain name lookup; iterating it never
//! influences the packed layout.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use crate::error::RenderError;
use crate::value::{Component, UniformValue, ValueKind};

/// Lanes per 16-byte uniform block row.
const LANES_PER_ROW: usize = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlockAlignment {
    /// No trailing padding.
    Tight,
    /// Pad the block with zero lanes to a multiple of 16 bytes.
    #[default]
    Std140,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub default: UniformValue,
}

impl FieldSpec {
    pub fn kind(&self) -> ValueKind {
        self.default.kind()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SchemaEntry {
    Field(FieldSpec),
    /// Declared zero lanes that keep the following field aligned.
    Padding(usize),
}

impl SchemaEntry {
    fn lanes(&self) -> usize {
        match self {
            SchemaEntry::Field(field) => field.kind().lanes(),
            SchemaEntry::Padding(lanes) => *lanes,
        }
    }
}

/// Offset report for one schema entry.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldLayout {
    /// `None` for declared padding.
    pub name: Option<String>,
    pub kind: Option<ValueKind>,
    pub offset: usize,
    pub size: usize,
}

/// A field whose packed offset disagrees with the WGSL uniform layout rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlignmentIssue {
    pub field: String,
    pub kind: ValueKind,
    pub offset: usize,
    pub required: usize,
}

impl std::fmt::Display for AlignmentIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "field '{}' ({}) sits at byte {} but WGSL aligns it to {} bytes; declare padding before it",
            self.field, self.kind, self.offset, self.required
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    entries: Vec<SchemaEntry>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.entries.iter().filter_map(|entry| match entry {
            SchemaEntry::Field(field) => Some(field),
            SchemaEntry::Padding(_) => None,
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields().find(|field| field.name == name)
    }

    pub fn kind_of(&self, name: &str) -> Option<ValueKind> {
        self.field(name).map(FieldSpec::kind)
    }

    /// Lane count before any trailing block padding.
    pub fn lanes(&self) -> usize {
        self.entries.iter().map(SchemaEntry::lanes).sum()
    }

    /// Packed byte length under `alignment`.
    pub fn packed_len(&self, alignment: BlockAlignment) -> usize {
        padded_lanes(self.lanes(), alignment) * 4
    }

    pub fn layout(&self) -> Vec<FieldLayout> {
        let mut offset = 0;
        let mut out = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let size = entry.lanes() * 4;
            let (name, kind) = match entry {
                SchemaEntry::Field(field) => (Some(field.name.clone()), Some(field.kind())),
                SchemaEntry::Padding(_) => (None, None),
            };
            out.push(FieldLayout {
                name,
                kind,
                offset,
                size,
            });
            offset += size;
        }
        out
    }

    pub fn alignment_issues(&self) -> Vec<AlignmentIssue> {
        self.layout()
            .into_iter()
            .filter_map(|layout| {
                let kind = layout.kind?;
                let required = kind.wgsl_align();
                if layout.offset % required == 0 {
                    return None;
                }
                Some(AlignmentIssue {
                    field: layout.name.unwrap_or_default(),
                    kind,
                    offset: layout.offset,
                    required,
                })
            })
            .collect()
    }

    /// Renders the WGSL struct declaration matching this schema.
    pub fn wgsl_struct(&self, struct_name: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "struct {struct_name} {{");
        let mut pad_index = 0;
        for entry in &self.entries {
            match entry {
                SchemaEntry::Field(field) => {
                    let _ = writeln!(out, "    {}: {},", field.name, field.kind().wgsl_type());
                }
                SchemaEntry::Padding(lanes) => {
                    for _ in 0..*lanes {
                        let _ = writeln!(out, "    _pad{pad_index}: f32,");
                        pad_index += 1;
                    }
                }
            }
        }
        out.push_str("}\n");
        out
    }

    /// Checks that `state` can be packed against this schema.
    pub fn check_state(&self, state: &UniformState) -> Result<(), RenderError> {
        for field in self.fields() {
            let value = state
                .get(&field.name)
                .ok_or_else(|| RenderError::MissingField(field.name.clone()))?;
            if value.kind() != field.kind() {
                return Err(RenderError::SchemaMismatch {
                    field: field.name.clone(),
                    expected: field.kind().to_string(),
                    found: value.kind().to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entries: Vec<SchemaEntry>,
}

impl SchemaBuilder {
    /// Declares a field; its kind is taken from the default value.
    pub fn field(mut self, name: &str, default: impl Into<UniformValue>) -> Self {
        self.entries.push(SchemaEntry::Field(FieldSpec {
            name: name.to_string(),
            default: default.into(),
        }));
        self
    }

    /// Declares a field of `kind` defaulting to zero.
    pub fn declare(self, name: &str, kind: ValueKind) -> Self {
        let default = match kind {
            ValueKind::Float => UniformValue::float(0.0),
            ValueKind::Int => UniformValue::int(0),
            ValueKind::Vec2 => UniformValue::Vec2([0.0; 2]),
            ValueKind::Vec3 => UniformValue::Vec3([0.0; 3]),
            ValueKind::Vec4 => UniformValue::Vec4([0.0; 4]),
            ValueKind::Mat4 => UniformValue::identity(),
        };
        self.field(name, default)
    }

    pub fn pad(mut self, lanes: usize) -> Self {
        if lanes > 0 {
            self.entries.push(SchemaEntry::Padding(lanes));
        }
        self
    }

    pub fn build(self) -> Result<Schema, RenderError> {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            let SchemaEntry::Field(field) = entry else {
                continue;
            };
            if !is_identifier(&field.name) {
                return Err(RenderError::SchemaMismatch {
                    field: field.name.clone(),
                    expected: "a WGSL identifier".to_string(),
                    found: format!("'{}'", field.name),
                });
            }
            if !seen.insert(field.name.as_str()) {
                return Err(RenderError::SchemaMismatch {
                    field: field.name.clone(),
                    expected: "a unique field name".to_string(),
                    found: "a duplicate declaration".to_string(),
                });
            }
        }
        Ok(Schema {
            entries: self.entries,
        })
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || (first == '_' && name.len() > 1 && !name.starts_with("__")))
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with("_pad")
}

fn padded_lanes(lanes: usize, alignment: BlockAlignment) -> usize {
    match alignment {
        BlockAlignment::Tight => lanes,
        BlockAlignment::Std140 => lanes.div_ceil(LANES_PER_ROW) * LANES_PER_ROW,
    }
}

/// Current values for every uniform, keyed by name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UniformState {
    values: HashMap<String, UniformValue>,
}

impl UniformState {
    pub fn from_schema(schema: &Schema) -> Self {
        let values = schema
            .fields()
            .map(|field| (field.name.clone(), field.default))
            .collect();
        Self { values }
    }

    /// Builds a state from raw pairs without consulting any schema.
    pub fn from_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, UniformValue)>,
        K: Into<String>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Updates a field. An existing field keeps its shape: assigning a value
    /// of another kind is a [`RenderError::SchemaMismatch`].
    pub fn set(&mut self, name: &str, value: impl Into<UniformValue>) -> Result<(), RenderError> {
        let value = value.into();
        if let Some(current) = self.values.get(name) {
            if current.kind() != value.kind() {
                return Err(RenderError::SchemaMismatch {
                    field: name.to_string(),
                    expected: current.kind().to_string(),
                    found: value.kind().to_string(),
                });
            }
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Writes `value` only if the field exists with the same kind.
    pub fn set_if_declared(&mut self, name: &str, value: impl Into<UniformValue>) -> bool {
        let value = value.into();
        match self.values.get_mut(name) {
            Some(slot) if slot.kind() == value.kind() => {
                *slot = value;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<UniformValue> {
        self.values.remove(name)
    }

    /// Carries values over to `schema` by name. Fields that keep their name and
    /// kind keep their value; new or reshaped fields start from the default.
    pub fn migrate(&self, schema: &Schema) -> UniformState {
        let values = schema
            .fields()
            .map(|field| {
                let value = match self.values.get(&field.name) {
                    Some(existing) if existing.kind() == field.kind() => *existing,
                    _ => field.default,
                };
                (field.name.clone(), value)
            })
            .collect();
        Self { values }
    }
}

/// Packed uniform block, one `u32` per lane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedBlock {
    words: Vec<u32>,
}

impl PackedBlock {
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn lanes(&self) -> usize {
        self.words.len()
    }

    pub fn byte_len(&self) -> usize {
        self.words.len() * 4
    }

    /// Lanes reinterpreted as floats; integer lanes come back as their bits.
    pub fn to_f32(&self) -> Vec<f32> {
        self.words.iter().copied().map(f32::from_bits).collect()
    }
}

/// Flattens `state` in `schema` order. Names in `state` that the schema does
/// not declare are ignored.
pub fn pack(
    schema: &Schema,
    state: &UniformState,
    alignment: BlockAlignment,
) -> Result<PackedBlock, RenderError> {
    let mut lanes: Vec<Component> = Vec::with_capacity(schema.lanes() + LANES_PER_ROW);
    for entry in schema.entries() {
        match entry {
            SchemaEntry::Field(field) => {
                let value = state
                    .get(&field.name)
                    .ok_or_else(|| RenderError::MissingField(field.name.clone()))?;
                if value.kind() != field.kind() {
                    return Err(RenderError::SchemaMismatch {
                        field: field.name.clone(),
                        expected: field.kind().to_string(),
                        found: value.kind().to_string(),
                    });
                }
                value.flatten_into(&mut lanes);
            }
            SchemaEntry::Padding(count) => {
                lanes.extend(std::iter::repeat(Component::F32(0.0)).take(*count));
            }
        }
    }

    let mut words: Vec<u32> = lanes.into_iter().map(Component::to_bits).collect();
    words.resize(padded_lanes(words.len(), alignment), 0);
    Ok(PackedBlock { words })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar_vec_mat() -> Schema {
        Schema::builder()
            .field("a", 0.0)
            .declare("b", ValueKind::Vec3)
            .declare("c", ValueKind::Mat4)
            .build()
            .unwrap()
    }

    #[test]
    fn packs_fields_in_declared_order() {
        let schema = scalar_vec_mat();
        let mut state = UniformState::from_schema(&schema);
        state.set("a", 2.0).unwrap();
        state.set("b", UniformValue::Vec3([1.0, 2.0, 3.0])).unwrap();
        state.set("c", UniformValue::identity()).unwrap();

        let expected = vec![
            2.0, 1.0, 2.0, 3.0, //
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        let tight = pack(&schema, &state, BlockAlignment::Tight).unwrap();
        assert_eq!(tight.to_f32(), expected);

        let aligned = pack(&schema, &state, BlockAlignment::Std140).unwrap();
        assert_eq!(aligned.lanes(), 20);
        assert_eq!(aligned.to_f32(), expected);
    }

    #[test]
    fn pads_thirteen_lanes_to_sixteen() {
        let schema = Schema::builder()
            .field("a", UniformValue::Vec4([1.0; 4]))
            .field("b", UniformValue::Vec4([2.0; 4]))
            .field("c", UniformValue::Vec4([3.0; 4]))
            .field("d", 4.0)
            .build()
            .unwrap();
        let state = UniformState::from_schema(&schema);
        let block = pack(&schema, &state, BlockAlignment::Std140).unwrap();
        assert_eq!(block.lanes(), 16);
        assert_eq!(&block.to_f32()[12..], &[4.0, 0.0, 0.0, 0.0]);
        assert_eq!(schema.packed_len(BlockAlignment::Std140), 64);
        assert_eq!(schema.packed_len(BlockAlignment::Tight), 52);
    }

    #[test]
    fn repeated_packs_are_byte_identical() {
        let schema = scalar_vec_mat();
        let mut state = UniformState::from_schema(&schema);
        state.set("b", UniformValue::Vec3([0.5, -1.0, 9.0])).unwrap();
        for index in 0..64 {
            state.set(&format!("extra_{index}"), index as f32).unwrap();
        }
        let first = pack(&schema, &state, BlockAlignment::Std140).unwrap();
        let second = pack(&schema, &state.clone(), BlockAlignment::Std140).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn extra_state_fields_are_ignored() {
        let schema = Schema::builder().field("a", 1.0).build().unwrap();
        let state = UniformState::from_values([
            ("a", UniformValue::float(1.0)),
            ("unused", UniformValue::Vec4([7.0; 4])),
        ]);
        let block = pack(&schema, &state, BlockAlignment::Tight).unwrap();
        assert_eq!(block.to_f32(), vec![1.0]);
    }

    #[test]
    fn missing_field_is_fatal() {
        let schema = scalar_vec_mat();
        let mut state = UniformState::from_schema(&schema);
        state.remove("b");
        let err = pack(&schema, &state, BlockAlignment::Std140).unwrap_err();
        assert!(matches!(err, RenderError::MissingField(ref name) if name == "b"));
    }

    #[test]
    fn reshaped_values_are_rejected() {
        let schema = scalar_vec_mat();
        let mut state = UniformState::from_schema(&schema);
        let err = state.set("b", UniformValue::Vec2([1.0, 2.0])).unwrap_err();
        assert!(matches!(err, RenderError::SchemaMismatch { .. }));

        let forged = UniformState::from_values([
            ("a", UniformValue::float(0.0)),
            ("b", UniformValue::Vec4([0.0; 4])),
            ("c", UniformValue::identity()),
        ]);
        assert!(schema.check_state(&forged).is_err());
        assert!(matches!(
            pack(&schema, &forged, BlockAlignment::Tight),
            Err(RenderError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn integer_lanes_keep_their_bits() {
        let schema = Schema::builder().field("frame", 7).build().unwrap();
        let state = UniformState::from_schema(&schema);
        let block = pack(&schema, &state, BlockAlignment::Std140).unwrap();
        assert_eq!(block.words(), &[7, 0, 0, 0]);
    }

    #[test]
    fn declared_padding_packs_as_zero_and_fixes_alignment() {
        let unaligned = Schema::builder()
            .field("scale", 1.0)
            .declare("position", ValueKind::Vec3)
            .build()
            .unwrap();
        let issues = unaligned.alignment_issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "position");
        assert_eq!(issues[0].offset, 4);

        let aligned = Schema::builder()
            .field("scale", 1.0)
            .pad(3)
            .field("position", UniformValue::Vec3([1.0, 2.0, 3.0]))
            .build()
            .unwrap();
        assert!(aligned.alignment_issues().is_empty());
        let block = pack(&aligned, &UniformState::from_schema(&aligned), BlockAlignment::Std140)
            .unwrap();
        assert_eq!(
            block.to_f32(),
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 0.0]
        );
    }

    #[test]
    fn wgsl_struct_lists_fields_and_padding() {
        let schema = Schema::builder()
            .field("canvas_size", UniformValue::Vec2([1.0, 1.0]))
            .field("render_scale", 1.0)
            .pad(1)
            .field("frame", 0)
            .build()
            .unwrap();
        let wgsl = schema.wgsl_struct("Uniforms");
        assert_eq!(
            wgsl,
            "struct Uniforms {\n    canvas_size: vec2<f32>,\n    render_scale: f32,\n    _pad0: f32,\n    frame: i32,\n}\n"
        );
    }

    #[test]
    fn builder_rejects_duplicates_and_bad_names() {
        assert!(Schema::builder().field("a", 1.0).field("a", 2.0).build().is_err());
        assert!(Schema::builder().field("1st", 1.0).build().is_err());
        assert!(Schema::builder().field("_pad3", 1.0).build().is_err());
    }

    #[test]
    fn migration_keeps_matching_fields() {
        let old = Schema::builder()
            .field("custom_a", 1.0)
            .field("custom_b", 2.0)
            .build()
            .unwrap();
        let mut state = UniformState::from_schema(&old);
        state.set("custom_a", 5.0).unwrap();
        state.set("custom_b", 6.0).unwrap();

        let new = Schema::builder()
            .field("custom_a", 0.0)
            .field("custom_b", UniformValue::Vec2([0.0, 0.0]))
            .field("custom_c", 3.0)
            .build()
            .unwrap();
        let migrated = state.migrate(&new);
        assert_eq!(migrated.get("custom_a"), Some(&UniformValue::float(5.0)));
        assert_eq!(migrated.get("custom_b"), Some(&UniformValue::Vec2([0.0, 0.0])));
        assert_eq!(migrated.get("custom_c"), Some(&UniformValue::float(3.0)));
    }
}
