//! `requestctl get`/`dump`/`find` output rendering. Ported from
//! `conftool.extensions.reqconfig.view`.

use crate::kvobject::Object;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Format {
    Json,
    Yaml,
    Pretty,
}

impl Format {
    pub fn parse(s: &str) -> Option<Format> {
        match s {
            "json" => Some(Format::Json),
            "yaml" => Some(Format::Yaml),
            "pretty" => Some(Format::Pretty),
            _ => None,
        }
    }
}

pub struct View {
    pub format: Format,
}

impl View {
    pub fn new(format: Format) -> View {
        View { format }
    }

    pub fn render(&self, objects: &[Object]) -> crate::Result<String> {
        match self.format {
            Format::Json => self.render_json(objects),
            Format::Yaml => self.render_yaml(objects),
            Format::Pretty => Ok(self.render_pretty(objects)),
        }
    }

    fn render_json(&self, objects: &[Object]) -> crate::Result<String> {
        let mut simple = serde_json::Map::new();
        for obj in objects {
            if let Some(fields) = obj.asdict().remove(&obj.name) {
                simple.insert(obj.pprint(), fields);
            }
        }
        Ok(serde_json::to_string_pretty(&simple)?)
    }

    fn render_yaml(&self, objects: &[Object]) -> crate::Result<String> {
        let mut simple = std::collections::BTreeMap::new();
        for obj in objects {
            if let Some(fields) = obj.asdict().remove(&obj.name) {
                simple.insert(obj.pprint(), fields);
            }
        }
        Ok(serde_yaml::to_string(&simple)?)
    }

    fn render_pretty(&self, objects: &[Object]) -> String {
        if objects.is_empty() {
            return String::new();
        }
        let headers = headers_for(&objects[0].entity_type.label);
        let mut rows: Vec<Vec<String>> = vec![headers.iter().map(|h| h.to_string()).collect()];
        for obj in objects {
            rows.push(row_for(obj, &headers));
        }
        let widths: Vec<usize> = (0..headers.len())
            .map(|i| rows.iter().map(|r| r[i].len()).max().unwrap_or(0))
            .collect();
        rows.iter()
            .map(|row| {
                row.iter()
                    .zip(&widths)
                    .map(|(cell, w)| format!("{:width$}", cell, width = w))
                    .collect::<Vec<_>>()
                    .join("  ")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn headers_for(label: &str) -> Vec<&'static str> {
    match label {
        "pattern" => vec!["name", "method", "url_path", "header"],
        "ipblock" => vec!["name", "cidrs", "comment"],
        "action" => vec!["name", "expression", "resp_status", "do_throttle"],
        _ => vec!["name"],
    }
}

fn row_for(obj: &Object, headers: &[&'static str]) -> Vec<String> {
    headers
        .iter()
        .map(|h| {
            if *h == "name" {
                obj.pprint()
            } else {
                obj.values
                    .get(*h)
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            }
        })
        .collect()
}
