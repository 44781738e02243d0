// Copyright 2024 yangd contributors
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

//! Parses the restricted-syntax instance-identifier xpaths the wire
//! protocol carries: `/mod:container/list[key='val']/leaf`. Full YANG
//! XPath 1.0 (functions, unions of predicates, relative paths) is out of
//! scope; every path on the wire is absolute and every predicate is a
//! literal key equality, which is all the edit engine ever needs.

use anyhow::{anyhow, bail};

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Present only on the first step, or when a step switches modules.
    pub module: Option<String>,
    pub name: String,
    /// `key_name = literal_value`, in document order.
    pub predicates: Vec<(String, String)>,
}

/// Parse an absolute xpath into its steps. Every step must have a
/// non-empty name; the first step must carry a module prefix.
pub fn parse(xpath: &str) -> anyhow::Result<Vec<Step>> {
    let xpath = xpath.strip_prefix('/').ok_or_else(|| anyhow!("xpath must be absolute: {xpath}"))?;
    if xpath.is_empty() {
        bail!("empty xpath");
    }

    let mut steps = Vec::new();
    let mut first = true;
    for raw in xpath.split('/') {
        if raw.is_empty() {
            bail!("empty path segment");
        }
        let (name_and_module, predicates) = split_predicates(raw)?;
        let (module, name) = match name_and_module.split_once(':') {
            Some((m, n)) => (Some(m.to_string()), n.to_string()),
            None => (None, name_and_module.to_string()),
        };
        if name.is_empty() {
            bail!("empty node name in segment {raw}");
        }
        if first && module.is_none() {
            bail!("first xpath step must carry a module prefix: {raw}");
        }
        first = false;
        steps.push(Step { module, name, predicates });
    }
    Ok(steps)
}

/// Render `steps` back into the wire's absolute-xpath text form, with
/// every predicate quoted. Used to label results that `DataTree::get_all`
/// resolved from a query that omitted some list predicates.
pub fn to_xpath(steps: &[Step]) -> String {
    let mut out = String::new();
    for step in steps {
        out.push('/');
        if let Some(module) = &step.module {
            out.push_str(module);
            out.push(':');
        }
        out.push_str(&step.name);
        for (key, value) in &step.predicates {
            out.push('[');
            out.push_str(key);
            out.push_str("='");
            out.push_str(value);
            out.push_str("']");
        }
    }
    out
}

fn split_predicates(segment: &str) -> anyhow::Result<(String, Vec<(String, String)>)> {
    let Some(bracket) = segment.find('[') else {
        return Ok((segment.to_string(), Vec::new()));
    };
    let name = segment[..bracket].to_string();
    let mut predicates = Vec::new();
    let mut rest = &segment[bracket..];
    while !rest.is_empty() {
        let close = rest.find(']').ok_or_else(|| anyhow!("unterminated predicate in {segment}"))?;
        let inner = &rest[1..close];
        let eq = inner.find('=').ok_or_else(|| anyhow!("predicate missing `=` in {segment}"))?;
        let key = inner[..eq].trim().to_string();
        let value = inner[eq + 1..].trim();
        let value = value
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
            .ok_or_else(|| anyhow!("predicate value must be quoted in {segment}"))?;
        predicates.push((key, value.to_string()));
        rest = &rest[close + 1..];
    }
    Ok((name, predicates))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_container_path() {
        let steps = parse("/ietf-interfaces:interfaces/interface").unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].module.as_deref(), Some("ietf-interfaces"));
        assert_eq!(steps[0].name, "interfaces");
        assert_eq!(steps[1].module, None);
        assert_eq!(steps[1].name, "interface");
    }

    #[test]
    fn parses_list_predicate() {
        let steps = parse("/m:interfaces/interface[name='eth0']/mtu").unwrap();
        assert_eq!(steps[1].predicates, vec![("name".to_string(), "eth0".to_string())]);
    }

    #[test]
    fn parses_multiple_predicates() {
        let steps = parse("/m:a/b[x='1'][y='2']").unwrap();
        assert_eq!(
            steps[1].predicates,
            vec![("x".to_string(), "1".to_string()), ("y".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn rejects_relative_path() {
        assert!(parse("interfaces/interface").is_err());
    }

    #[test]
    fn rejects_missing_module_on_first_step() {
        assert!(parse("/interfaces/interface").is_err());
    }

    #[test]
    fn rejects_unterminated_predicate() {
        assert!(parse("/m:a/b[x='1'").is_err());
    }
}
