// Copyright 2023 Greptime Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Record shredding: turns nested in-memory rows into per-leaf value and
//! level buffers ready for the parquet column writers.
//!
//! Levels follow the standard rules: an `optional` node adds one definition
//! level when present, a list adds one definition and one repetition level
//! per element, `required` nodes add nothing. The schemas in this crate keep
//! all groups required, so a leaf's definition level equals its depth.

use std::io::Write;

use parquet::basic::{ConvertedType, Repetition, Type as PhysicalType};
use parquet::data_type::{
    BoolType, ByteArray, ByteArrayType, DoubleType, Int32Type, Int64Type,
};
use parquet::schema::types::{SchemaDescriptor, Type, TypePtr};
use parquet::file::writer::SerializedFileWriter;
use snafu::{ensure, ResultExt};

use crate::error::{Result, UnexpectedRowShapeSnafu, WriteParquetSnafu};

/// A nested row value mirroring the shape of the schema it is shredded
/// against. `Null` stands for an absent optional field.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Bytes(Vec<u8>),
    Group(Vec<RecordValue>),
    List(Vec<RecordValue>),
}

impl RecordValue {
    pub fn string(value: impl Into<String>) -> RecordValue {
        RecordValue::Bytes(value.into().into_bytes())
    }

    pub fn opt_string(value: &Option<String>) -> RecordValue {
        match value {
            Some(v) => RecordValue::string(v.clone()),
            None => RecordValue::Null,
        }
    }

    pub fn opt_i64(value: Option<i64>) -> RecordValue {
        match value {
            Some(v) => RecordValue::Int64(v),
            None => RecordValue::Null,
        }
    }
}

enum NodeKind {
    Primitive(PhysicalType),
    Group(Vec<Node>),
    List(Box<Node>),
}

struct Node {
    name: String,
    optional: bool,
    kind: NodeKind,
    leaf_start: usize,
    leaf_count: usize,
    /// For lists: the repetition level of this list's elements.
    element_rep: i16,
}

enum LeafValues {
    Bool(Vec<bool>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Double(Vec<f64>),
    Bytes(Vec<ByteArray>),
}

struct LeafBuffer {
    path: String,
    max_def: i16,
    max_rep: i16,
    values: LeafValues,
    defs: Vec<i16>,
    reps: Vec<i16>,
}

/// Shreds rows against a fixed schema and flushes them as row groups.
pub struct Shredder {
    fields: Vec<Node>,
    leaves: Vec<LeafBuffer>,
    rows: usize,
}

impl Shredder {
    pub fn new(schema: &TypePtr) -> Result<Shredder> {
        let mut leaves = Vec::new();
        let mut fields = Vec::new();
        let mut path = Vec::new();
        for field in schema.get_fields() {
            fields.push(build_node(field, 0, 0, &mut leaves, &mut path)?);
        }

        // The leaf walk must agree with the parquet schema descriptor on
        // order and levels; bail out early if it does not.
        let descr = SchemaDescriptor::new(schema.clone());
        ensure!(
            descr.num_columns() == leaves.len(),
            UnexpectedRowShapeSnafu {
                reason: format!(
                    "schema has {} leaf columns, shredder found {}",
                    descr.num_columns(),
                    leaves.len()
                ),
            }
        );
        for (i, leaf) in leaves.iter().enumerate() {
            let column = descr.column(i);
            ensure!(
                column.path().string() == leaf.path
                    && column.max_def_level() == leaf.max_def
                    && column.max_rep_level() == leaf.max_rep,
                UnexpectedRowShapeSnafu {
                    reason: format!(
                        "leaf {} mismatch: {} vs {}",
                        i,
                        column.path().string(),
                        leaf.path
                    ),
                }
            );
        }

        Ok(Shredder {
            fields,
            leaves,
            rows: 0,
        })
    }

    /// Appends one row. The row must be a group with the message's fields in
    /// schema order.
    pub fn shred(&mut self, row: &RecordValue) -> Result<()> {
        let RecordValue::Group(values) = row else {
            return UnexpectedRowShapeSnafu {
                reason: "top-level row is not a group",
            }
            .fail();
        };
        ensure!(
            values.len() == self.fields.len(),
            UnexpectedRowShapeSnafu {
                reason: format!(
                    "row has {} fields, schema has {}",
                    values.len(),
                    self.fields.len()
                ),
            }
        );
        for (node, value) in self.fields.iter().zip(values.iter()) {
            shred_field(&mut self.leaves, node, value, 0, 0)?;
        }
        self.rows += 1;
        Ok(())
    }

    pub fn buffered_rows(&self) -> usize {
        self.rows
    }

    /// Writes all buffered rows as one row group and clears the buffers.
    pub fn write_row_group<W: Write + Send>(
        &mut self,
        writer: &mut SerializedFileWriter<W>,
    ) -> Result<()> {
        let mut row_group = writer.next_row_group().context(WriteParquetSnafu)?;
        for leaf in &mut self.leaves {
            let mut column = row_group
                .next_column()
                .context(WriteParquetSnafu)?
                .expect("schema descriptor and leaf buffers agree on column count");
            let defs = (leaf.max_def > 0).then_some(leaf.defs.as_slice());
            let reps = (leaf.max_rep > 0).then_some(leaf.reps.as_slice());
            match &leaf.values {
                LeafValues::Bool(values) => {
                    column
                        .typed::<BoolType>()
                        .write_batch(values, defs, reps)
                        .context(WriteParquetSnafu)?;
                }
                LeafValues::Int32(values) => {
                    column
                        .typed::<Int32Type>()
                        .write_batch(values, defs, reps)
                        .context(WriteParquetSnafu)?;
                }
                LeafValues::Int64(values) => {
                    column
                        .typed::<Int64Type>()
                        .write_batch(values, defs, reps)
                        .context(WriteParquetSnafu)?;
                }
                LeafValues::Double(values) => {
                    column
                        .typed::<DoubleType>()
                        .write_batch(values, defs, reps)
                        .context(WriteParquetSnafu)?;
                }
                LeafValues::Bytes(values) => {
                    column
                        .typed::<ByteArrayType>()
                        .write_batch(values, defs, reps)
                        .context(WriteParquetSnafu)?;
                }
            }
            column.close().context(WriteParquetSnafu)?;

            match &mut leaf.values {
                LeafValues::Bool(v) => v.clear(),
                LeafValues::Int32(v) => v.clear(),
                LeafValues::Int64(v) => v.clear(),
                LeafValues::Double(v) => v.clear(),
                LeafValues::Bytes(v) => v.clear(),
            }
            leaf.defs.clear();
            leaf.reps.clear();
        }
        row_group.close().context(WriteParquetSnafu)?;
        self.rows = 0;
        Ok(())
    }
}

fn build_node(
    ty: &TypePtr,
    def: i16,
    rep: i16,
    leaves: &mut Vec<LeafBuffer>,
    path: &mut Vec<String>,
) -> Result<Node> {
    let info = ty.get_basic_info();
    let optional = info.repetition() == Repetition::OPTIONAL;
    let def = if optional { def + 1 } else { def };
    let name = info.name().to_string();
    path.push(name.clone());

    let node = match ty.as_ref() {
        Type::PrimitiveType { physical_type, .. } => {
            let leaf_start = leaves.len();
            leaves.push(LeafBuffer {
                path: path.join("."),
                max_def: def,
                max_rep: rep,
                values: match physical_type {
                    PhysicalType::BOOLEAN => LeafValues::Bool(Vec::new()),
                    PhysicalType::INT32 => LeafValues::Int32(Vec::new()),
                    PhysicalType::INT64 => LeafValues::Int64(Vec::new()),
                    PhysicalType::DOUBLE => LeafValues::Double(Vec::new()),
                    PhysicalType::BYTE_ARRAY => LeafValues::Bytes(Vec::new()),
                    other => {
                        return UnexpectedRowShapeSnafu {
                            reason: format!("unsupported physical type {other} in schema"),
                        }
                        .fail()
                    }
                },
                defs: Vec::new(),
                reps: Vec::new(),
            });
            Ok(Node {
                name,
                optional,
                kind: NodeKind::Primitive(*physical_type),
                leaf_start,
                leaf_count: 1,
                element_rep: rep,
            })
        }
        Type::GroupType { .. } if info.converted_type() == ConvertedType::LIST => {
            let fields = ty.get_fields();
            let repeated = match fields {
                [repeated] if repeated.get_basic_info().repetition() == Repetition::REPEATED => {
                    repeated
                }
                _ => {
                    return UnexpectedRowShapeSnafu {
                        reason: format!("list group {name} is not in three-level form"),
                    }
                    .fail()
                }
            };
            let element = match repeated.get_fields() {
                [element] => element,
                _ => {
                    return UnexpectedRowShapeSnafu {
                        reason: format!("list group {name} has no single element"),
                    }
                    .fail()
                }
            };

            let leaf_start = leaves.len();
            path.push(repeated.get_basic_info().name().to_string());
            let element_node = build_node(element, def + 1, rep + 1, leaves, path)?;
            path.pop();
            let leaf_count = leaves.len() - leaf_start;
            Ok(Node {
                name,
                optional,
                kind: NodeKind::List(Box::new(element_node)),
                leaf_start,
                leaf_count,
                element_rep: rep + 1,
            })
        }
        Type::GroupType { .. } => {
            let leaf_start = leaves.len();
            let mut children = Vec::new();
            for field in ty.get_fields() {
                children.push(build_node(field, def, rep, leaves, path)?);
            }
            Ok(Node {
                name,
                optional,
                kind: NodeKind::Group(children),
                leaf_start,
                leaf_count: leaves.len() - leaf_start,
                element_rep: rep,
            })
        }
    };
    path.pop();
    node
}

fn shred_field(
    leaves: &mut [LeafBuffer],
    node: &Node,
    value: &RecordValue,
    rep: i16,
    def: i16,
) -> Result<()> {
    if node.optional {
        return match value {
            RecordValue::Null => {
                null_subtree(leaves, node, rep, def);
                Ok(())
            }
            _ => shred_present(leaves, node, value, rep, def + 1),
        };
    }
    ensure!(
        !matches!(value, RecordValue::Null),
        UnexpectedRowShapeSnafu {
            reason: format!("null value for required field {}", node.name),
        }
    );
    shred_present(leaves, node, value, rep, def)
}

fn shred_present(
    leaves: &mut [LeafBuffer],
    node: &Node,
    value: &RecordValue,
    rep: i16,
    def: i16,
) -> Result<()> {
    match &node.kind {
        NodeKind::Primitive(_) => {
            let leaf = &mut leaves[node.leaf_start];
            match (&mut leaf.values, value) {
                (LeafValues::Bool(buf), RecordValue::Bool(v)) => buf.push(*v),
                (LeafValues::Int32(buf), RecordValue::Int32(v)) => buf.push(*v),
                (LeafValues::Int64(buf), RecordValue::Int64(v)) => buf.push(*v),
                (LeafValues::Double(buf), RecordValue::Double(v)) => buf.push(*v),
                (LeafValues::Bytes(buf), RecordValue::Bytes(v)) => {
                    buf.push(ByteArray::from(v.clone()))
                }
                _ => {
                    return UnexpectedRowShapeSnafu {
                        reason: format!("value type mismatch for field {}", node.name),
                    }
                    .fail()
                }
            }
            leaf.defs.push(def);
            leaf.reps.push(rep);
            Ok(())
        }
        NodeKind::Group(children) => {
            let RecordValue::Group(values) = value else {
                return UnexpectedRowShapeSnafu {
                    reason: format!("expected group for field {}", node.name),
                }
                .fail();
            };
            ensure!(
                values.len() == children.len(),
                UnexpectedRowShapeSnafu {
                    reason: format!(
                        "group {} has {} fields, schema has {}",
                        node.name,
                        values.len(),
                        children.len()
                    ),
                }
            );
            for (child, v) in children.iter().zip(values.iter()) {
                shred_field(leaves, child, v, rep, def)?;
            }
            Ok(())
        }
        NodeKind::List(element) => {
            let RecordValue::List(elements) = value else {
                return UnexpectedRowShapeSnafu {
                    reason: format!("expected list for field {}", node.name),
                }
                .fail();
            };
            if elements.is_empty() {
                null_subtree(leaves, node, rep, def);
                return Ok(());
            }
            for (i, elem) in elements.iter().enumerate() {
                let elem_rep = if i == 0 { rep } else { node.element_rep };
                shred_field(leaves, element, elem, elem_rep, def + 1)?;
            }
            Ok(())
        }
    }
}

/// Marks every leaf under `node` undefined at the given levels.
fn null_subtree(leaves: &mut [LeafBuffer], node: &Node, rep: i16, def: i16) {
    for leaf in &mut leaves[node.leaf_start..node.leaf_start + node.leaf_count] {
        leaf.defs.push(def);
        leaf.reps.push(rep);
    }
}
