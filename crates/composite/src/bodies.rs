//! Moving-body input parsing
//!
//! Reads the solver-side body definitions so composite boundary tags can be
//! checked against the bodies that reference them:
//! ```text
//! &body_definitions
//!  n_moving_bodies = 2,
//!  body_name(1) = 'store1',
//!  defining_bndry(1,1) = 4,
//!  body_name(2) = 'store2',
//!  defining_bndry(1,2) = 5,
//!  defining_bndry(2,2) = 6,
//! ```

use anyhow::{bail, Context};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Body {
    pub name: String,
    pub tags: Vec<i32>,
}

pub fn parse(input: &str) -> anyhow::Result<Vec<Body>> {
    let mut bodies: Vec<Body> = Vec::new();
    for raw in input.lines() {
        let line = raw.trim().trim_end_matches(',');
        if let Some(value) = assignment(line, "n_moving_bodies") {
            let count: usize = value.trim().parse().context("bad n_moving_bodies")?;
            bodies.resize(count, Body::default());
        } else if let Some((indices, value)) = indexed_assignment(line, "body_name") {
            let body = one_based(&indices, 0, bodies.len())?;
            bodies[body].name = value.trim().trim_matches('\'').to_string();
        } else if let Some((indices, value)) = indexed_assignment(line, "defining_bndry") {
            let body = one_based(&indices, 1, bodies.len())?;
            let tag: i32 = value.trim().parse().context("bad defining_bndry tag")?;
            bodies[body].tags.push(tag);
        }
    }
    for (i, body) in bodies.iter().enumerate() {
        if body.name.is_empty() {
            bail!("body {} has no name", i + 1);
        }
    }
    Ok(bodies)
}

fn assignment<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(key)?.trim_start();
    rest.strip_prefix('=')
}

fn indexed_assignment<'a>(line: &'a str, key: &str) -> Option<(Vec<usize>, &'a str)> {
    let rest = line.strip_prefix(key)?.trim_start();
    let rest = rest.strip_prefix('(')?;
    let close = rest.find(')')?;
    let indices: Vec<usize> = rest[..close]
        .split(',')
        .map(|s| s.trim().parse().ok())
        .collect::<Option<_>>()?;
    let value = rest[close + 1..].trim_start().strip_prefix('=')?;
    Some((indices, value))
}

fn one_based(indices: &[usize], position: usize, count: usize) -> anyhow::Result<usize> {
    let index = *indices
        .get(position)
        .with_context(|| format!("missing body index in {indices:?}"))?;
    if index == 0 || index > count {
        bail!("body index {index} outside 1..={count}");
    }
    Ok(index - 1)
}
