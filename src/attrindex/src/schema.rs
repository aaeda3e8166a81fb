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

//! Parquet schemas of the data file and the attribute index file.
//!
//! All groups are `required` so that a leaf's definition level equals its
//! nesting depth; the row-number arithmetic in `parquetscan` depends on
//! that alignment.

use std::sync::Arc;

use parquet::schema::parser::parse_message_type;
use parquet::schema::types::TypePtr;
use snafu::ResultExt;

use crate::error::{BuildSchemaSnafu, Result};

/// Leaf column paths of the index file consumed by the index iterator.
pub const COLUMN_KEY: &str = "Key";
pub const COLUMN_SCOPE: &str = "Scopes.list.element.Scope";
pub const COLUMN_STRING_VALUE: &str =
    "Scopes.list.element.ValuesString.list.element.Value.list.element";
pub const COLUMN_STRING_ROW_NUMBERS_LVL: [&str; 4] = [
    "Scopes.list.element.ValuesString.list.element.RowNumbers.Lvl01.list.element",
    "Scopes.list.element.ValuesString.list.element.RowNumbers.Lvl02.list.element",
    "Scopes.list.element.ValuesString.list.element.RowNumbers.Lvl03.list.element",
    "Scopes.list.element.ValuesString.list.element.RowNumbers.Lvl04.list.element",
];

/// Entry names the index iterator selects columns as.
pub const ENTRY_KEY: &str = "Key";
pub const ENTRY_SCOPE: &str = "Scope";
pub const ENTRY_VALUE: &str = "Value";
pub const ENTRY_ROW_NUMBER_LVL: [&str; 4] = ["Lvl01", "Lvl02", "Lvl03", "Lvl04"];

const ATTRS_FRAGMENT: &str = "
    required group Attrs (LIST) {
        repeated group list {
            required group element {
                required binary Key (STRING);
                required group ValueString (LIST) {
                    repeated group list { required binary element (STRING); }
                }
                required group ValueInt (LIST) {
                    repeated group list { required int64 element; }
                }
                required group ValueDouble (LIST) {
                    repeated group list { required double element; }
                }
                required group ValueBool (LIST) {
                    repeated group list { required boolean element; }
                }
                required boolean IsArray;
            }
        }
    }";

fn dedicated_fragment() -> String {
    let mut out = String::from("required group DedicatedAttributes {");
    for i in 1..=crate::model::MAX_DEDICATED_COLUMNS {
        out.push_str(&format!("optional binary String{i:02} (STRING);"));
    }
    out.push('}');
    out
}

/// The nested trace schema of `data.parquet`.
pub fn data_message_type() -> Result<TypePtr> {
    let attrs = ATTRS_FRAGMENT;
    let dedicated = dedicated_fragment();
    let message = format!(
        "
        message Trace {{
            required binary TraceID;
            required group ResourceSpans (LIST) {{
                repeated group list {{
                    required group element {{
                        required group Resource {{
                            {attrs}
                            optional binary ServiceName (STRING);
                            optional binary Cluster (STRING);
                            optional binary Namespace (STRING);
                            optional binary Pod (STRING);
                            optional binary Container (STRING);
                            optional binary K8sClusterName (STRING);
                            optional binary K8sNamespaceName (STRING);
                            optional binary K8sPodName (STRING);
                            optional binary K8sContainerName (STRING);
                            {dedicated}
                        }}
                        required group ScopeSpans (LIST) {{
                            repeated group list {{
                                required group element {{
                                    required group Scope {{
                                        optional binary Name (STRING);
                                        optional binary Version (STRING);
                                        {attrs}
                                    }}
                                    required group Spans (LIST) {{
                                        repeated group list {{
                                            required group element {{
                                                optional binary Name (STRING);
                                                optional int64 Kind;
                                                optional int64 StatusCode;
                                                optional binary StatusMessage (STRING);
                                                optional binary HttpMethod (STRING);
                                                optional binary HttpUrl (STRING);
                                                optional int64 HttpStatusCode;
                                                {attrs}
                                                {dedicated}
                                                required group Events (LIST) {{
                                                    repeated group list {{
                                                        required group element {{
                                                            optional binary Name (STRING);
                                                            {attrs}
                                                        }}
                                                    }}
                                                }}
                                                required group Links (LIST) {{
                                                    repeated group list {{
                                                        required group element {{
                                                            {attrs}
                                                        }}
                                                    }}
                                                }}
                                            }}
                                        }}
                                    }}
                                }}
                            }}
                        }}
                    }}
                }}
            }}
        }}"
    );
    parse_message_type(&message)
        .map(Arc::new)
        .context(BuildSchemaSnafu)
}

fn values_fragment(name: &str, element: &str, codes: bool, rows: bool) -> String {
    let value_code = if codes {
        "required int64 ValueCode;"
    } else {
        ""
    };
    let row_numbers = if rows {
        "
        required group RowNumbers {
            required group Lvl01 (LIST) { repeated group list { required int32 element; } }
            required group Lvl02 (LIST) { repeated group list { required int32 element; } }
            required group Lvl03 (LIST) { repeated group list { required int32 element; } }
            required group Lvl04 (LIST) { repeated group list { required int32 element; } }
        }
        required binary RowNumbersEnc;"
    } else {
        ""
    };
    format!(
        "
        required group {name} (LIST) {{
            repeated group list {{
                required group element {{
                    required group Value (LIST) {{
                        repeated group list {{ required {element}; }}
                    }}
                    {value_code}
                    {row_numbers}
                }}
            }}
        }}"
    )
}

/// The attribute index schema. `codes` adds the `KeyCode`/`ValueCode`
/// columns, `rows` adds the per-level row number lists and the encoded
/// `RowNumbersEnc` bytes.
pub fn index_message_type(codes: bool, rows: bool) -> Result<TypePtr> {
    let key_code = if codes {
        "required int64 KeyCode;"
    } else {
        ""
    };
    let values_string = values_fragment("ValuesString", "binary element (STRING)", codes, rows);
    let values_int = values_fragment("ValuesInt", "int64 element", codes, rows);
    let values_float = values_fragment("ValuesFloat", "double element", codes, rows);
    let values_bool = values_fragment("ValuesBool", "boolean element", codes, rows);
    let message = format!(
        "
        message AttrIndex {{
            required binary Key (STRING);
            {key_code}
            required group Scopes (LIST) {{
                repeated group list {{
                    required group element {{
                        required int64 Scope;
                        {values_string}
                        {values_int}
                        {values_float}
                        {values_bool}
                    }}
                }}
            }}
        }}"
    );
    parse_message_type(&message)
        .map(Arc::new)
        .context(BuildSchemaSnafu)
}

#[cfg(test)]
mod tests {
    use parquet::schema::types::SchemaDescriptor;

    use super::*;

    #[test]
    fn test_data_schema_parses() {
        let schema = data_message_type().unwrap();
        let descr = SchemaDescriptor::new(schema);
        // Deepest leaves stay within the supported 8 nesting levels.
        for column in descr.columns() {
            assert!(column.max_rep_level() <= 7, "{}", column.path().string());
        }
    }

    #[test]
    fn test_index_schema_level_alignment() {
        let schema = index_message_type(true, true).unwrap();
        let descr = SchemaDescriptor::new(schema);

        // Definition level == nesting depth for every iterator column; the
        // row-number tracking relies on it.
        for (path, def, rep) in [
            (COLUMN_KEY, 0, 0),
            (COLUMN_SCOPE, 1, 1),
            (COLUMN_STRING_VALUE, 3, 3),
            (COLUMN_STRING_ROW_NUMBERS_LVL[0], 3, 3),
            (COLUMN_STRING_ROW_NUMBERS_LVL[3], 3, 3),
        ] {
            let column = descr
                .columns()
                .iter()
                .find(|c| c.path().string() == path)
                .unwrap_or_else(|| panic!("missing column {path}"));
            assert_eq!(def, column.max_def_level(), "{path}");
            assert_eq!(rep, column.max_rep_level(), "{path}");
        }
    }

    #[test]
    fn test_index_schema_variants() {
        let rows_only = index_message_type(false, true).unwrap();
        let descr = SchemaDescriptor::new(rows_only);
        assert!(descr
            .columns()
            .iter()
            .all(|c| !c.path().string().contains("ValueCode")));

        let codes_only = index_message_type(true, false).unwrap();
        let descr = SchemaDescriptor::new(codes_only);
        assert!(descr
            .columns()
            .iter()
            .all(|c| !c.path().string().contains("RowNumbers")));
    }
}
