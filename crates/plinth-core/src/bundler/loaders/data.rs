//! Data loaders: `json`, `xml`, `csv`.

use super::js_string;
use crate::bundler::loader::{Loader, LoaderContext, LoaderError, Transformed};
use crate::bundler::unit::ModuleType;

/// JSON document as the module's default export.
pub struct JsonLoader;

impl Loader for JsonLoader {
    fn name(&self) -> &str {
        "json"
    }

    fn apply(
        &self,
        mut input: Transformed,
        _options: &serde_json::Value,
        _ctx: &LoaderContext<'_>,
    ) -> Result<Transformed, LoaderError> {
        let value: serde_json::Value = serde_json::from_str(input.text()?)?;
        input.set_text(format!("export default {value};\n"));
        input.module_type = ModuleType::Script;
        Ok(input)
    }
}

/// Well-formed XML text as the module's default export.
pub struct XmlLoader;

impl Loader for XmlLoader {
    fn name(&self) -> &str {
        "xml"
    }

    fn apply(
        &self,
        mut input: Transformed,
        _options: &serde_json::Value,
        _ctx: &LoaderContext<'_>,
    ) -> Result<Transformed, LoaderError> {
        let text = input.text()?.to_string();
        let root = {
            let doc = roxmltree::Document::parse(&text)?;
            doc.root_element().tag_name().name().to_string()
        };
        input.set_text(format!(
            "export const root = {};\nexport default {};\n",
            js_string(&root),
            js_string(&text)
        ));
        input.module_type = ModuleType::Script;
        Ok(input)
    }
}

/// CSV/TSV rows as the module's default export.
///
/// Options: `delimiter` (defaults to tab for `.tsv`, comma otherwise),
/// `header` (rows become objects keyed by the first row),
/// `skipEmptyLines` (default `true`).
pub struct CsvLoader;

impl Loader for CsvLoader {
    fn name(&self) -> &str {
        "csv"
    }

    fn apply(
        &self,
        mut input: Transformed,
        options: &serde_json::Value,
        ctx: &LoaderContext<'_>,
    ) -> Result<Transformed, LoaderError> {
        let delimiter = match options.get("delimiter").and_then(|v| v.as_str()) {
            Some(d) => {
                let mut chars = d.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => c,
                    _ => return Err(format!("'delimiter' must be one character, got '{d}'").into()),
                }
            }
            None if ctx.unit.ext().eq_ignore_ascii_case(".tsv") => '\t',
            None => ',',
        };
        let header = options
            .get("header")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        let skip_empty = options
            .get("skipEmptyLines")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true);

        let mut rows = parse_csv(input.text()?, delimiter)?;
        if skip_empty {
            rows.retain(|r| !(r.len() == 1 && r[0].is_empty()));
        }

        let value = if header && !rows.is_empty() {
            let keys = rows.remove(0);
            serde_json::Value::Array(
                rows.into_iter()
                    .map(|row| {
                        let obj = keys
                            .iter()
                            .cloned()
                            .zip(row.into_iter().map(serde_json::Value::String))
                            .collect();
                        serde_json::Value::Object(obj)
                    })
                    .collect(),
            )
        } else {
            serde_json::to_value(rows)?
        };

        input.set_text(format!("export default {value};\n"));
        input.module_type = ModuleType::Script;
        Ok(input)
    }
}

/// Parse delimited text with RFC 4180 quoting.
fn parse_csv(text: &str, delimiter: char) -> Result<Vec<Vec<String>>, LoaderError> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();
    let mut line = 1;

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                line += 1;
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            c if c == delimiter => row.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(format!("unterminated quoted field ending at line {line}").into());
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{ctx, input, settings, text};
    use super::*;
    use crate::bundler::unit::UnitId;
    use serde_json::{json, Value};

    #[test]
    fn test_json() {
        let s = settings();
        let id = UnitId::new("/app/data.json", None);
        let out = JsonLoader
            .apply(input("{ \"a\": [1, 2] }", ModuleType::Asset), &Value::Null, &ctx(&id, &s))
            .unwrap();
        assert_eq!(text(&out), "export default {\"a\":[1,2]};\n");
        assert_eq!(out.module_type, ModuleType::Script);
    }

    #[test]
    fn test_json_invalid() {
        let s = settings();
        let id = UnitId::new("/app/data.json", None);
        assert!(JsonLoader
            .apply(input("{ nope", ModuleType::Asset), &Value::Null, &ctx(&id, &s))
            .is_err());
    }

    #[test]
    fn test_xml() {
        let s = settings();
        let id = UnitId::new("/app/feed.xml", None);
        let out = XmlLoader
            .apply(input("<feed><a/></feed>", ModuleType::Asset), &Value::Null, &ctx(&id, &s))
            .unwrap();
        assert!(text(&out).contains("export const root = \"feed\";"));
        assert!(XmlLoader
            .apply(input("<feed>", ModuleType::Asset), &Value::Null, &ctx(&id, &s))
            .is_err());
    }

    #[test]
    fn test_parse_csv_quoting() {
        let rows = parse_csv("a,\"b,c\",\"d\"\"e\"\r\n1,2,3\n", ',').unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["a".to_string(), "b,c".to_string(), "d\"e".to_string()],
                vec!["1".to_string(), "2".to_string(), "3".to_string()],
            ]
        );
        assert!(parse_csv("\"open", ',').is_err());
    }

    #[test]
    fn test_tsv_with_header() {
        let s = settings();
        let id = UnitId::new("/app/people.tsv", None);
        let out = CsvLoader
            .apply(
                input("name\tage\nada\t36\n\n", ModuleType::Asset),
                &json!({"header": true}),
                &ctx(&id, &s),
            )
            .unwrap();
        let code = text(&out);
        let json = code
            .strip_prefix("export default ")
            .and_then(|c| c.strip_suffix(";\n"))
            .unwrap();
        let value: Value = serde_json::from_str(json).unwrap();
        assert_eq!(value, json!([{"name": "ada", "age": "36"}]));
    }
}
