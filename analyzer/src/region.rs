//! Region analyzer (C9, §3.4/§4.9): nests scopes into regions and decides
//! which can bulk-free at scope exit.

use std::collections::{HashMap, HashSet};

use crate::escape::{EscapeClass, EscapeTable};
use crate::forms::{self, Expr, Head};
use crate::rc_elision::AliasGraph;

pub type RegionId = u32;

#[derive(Debug, Clone)]
pub struct RegionInfo {
    pub id: RegionId,
    pub name: Option<String>,
    pub scope_depth: usize,
    pub start: usize,
    pub end: usize,
    pub members: Vec<String>,
    pub parent: Option<RegionId>,
    pub external_refcount: usize,
    pub has_escaping_refs: bool,
}

impl RegionInfo {
    /// §8.1 property 8 / §4.9: bulk-freeable iff both counters are zero.
    pub fn can_bulk_free(&self) -> bool {
        self.external_refcount == 0 && !self.has_escaping_refs
    }
}

/// The per-function region table: every region plus a `var -> region id`
/// index (§4.9 "region id per variable enables same-region alias
/// collapse").
#[derive(Debug, Default)]
pub struct RegionTable {
    regions: Vec<RegionInfo>,
    region_of: HashMap<String, RegionId>,
}

impl RegionTable {
    pub fn region(&self, id: RegionId) -> Option<&RegionInfo> {
        self.regions.get(id as usize)
    }

    pub fn regions(&self) -> &[RegionInfo] {
        &self.regions
    }

    pub fn region_of(&self, var: &str) -> Option<&RegionInfo> {
        self.region_of.get(var).and_then(|id| self.region(*id))
    }

    pub fn same_region(&self, a: &str, b: &str) -> bool {
        match (self.region_of.get(a), self.region_of.get(b)) {
            (Some(ra), Some(rb)) => ra == rb,
            _ => false,
        }
    }

    pub fn region_can_bulk_free(&self, id: RegionId) -> bool {
        self.region(id).map(|r| r.can_bulk_free()).unwrap_or(false)
    }
}

/// Walks one function body, pushing a region for every scope-introducing
/// form (`let`/`let*`/`letrec`/`lambda`, §4.9) and popping it on exit.
pub struct RegionAnalyzer {
    position: usize,
    scope_depth: usize,
    stack: Vec<RegionId>,
    regions: Vec<RegionInfo>,
    region_of: HashMap<String, RegionId>,
    bulk_free_requires_exact_refcount: bool,
}

impl RegionAnalyzer {
    pub fn new(bulk_free_requires_exact_refcount: bool) -> Self {
        RegionAnalyzer {
            position: 0,
            scope_depth: 0,
            stack: Vec::new(),
            regions: Vec::new(),
            region_of: HashMap::new(),
            bulk_free_requires_exact_refcount,
        }
    }

    fn tick(&mut self) -> usize {
        let p = self.position;
        self.position += 1;
        p
    }

    fn push_region(&mut self, name: Option<String>) -> RegionId {
        let id = self.regions.len() as RegionId;
        let parent = self.stack.last().copied();
        self.regions.push(RegionInfo {
            id,
            name,
            scope_depth: self.scope_depth,
            start: self.position,
            end: self.position,
            members: Vec::new(),
            parent,
            external_refcount: 0,
            has_escaping_refs: false,
        });
        self.stack.push(id);
        self.scope_depth += 1;
        id
    }

    fn pop_region(&mut self) {
        let id = self.stack.pop().expect("region stack underflow");
        self.regions[id as usize].end = self.position;
        self.scope_depth -= 1;
    }

    fn bind(&mut self, name: &str) {
        if let Some(&id) = self.stack.last() {
            self.regions[id as usize].members.push(name.to_string());
            self.region_of.insert(name.to_string(), id);
        }
    }

    pub fn walk(&mut self, expr: Expr<'_>) {
        self.tick();
        match forms::classify(expr) {
            Some((Head::Let | Head::LetStar | Head::Letrec, args)) => {
                self.push_region(None);
                if let Some(&bindings_list) = args.first() {
                    for (name, value_expr) in forms::parse_bindings(bindings_list) {
                        self.walk(value_expr);
                        self.bind(name);
                    }
                }
                for &body_expr in &args[1.min(args.len())..] {
                    self.walk(body_expr);
                }
                self.pop_region();
            }
            Some((Head::Lambda, args)) => {
                self.push_region(None);
                if let Some(&params_list) = args.first() {
                    let (params, _) = params_list.to_vec();
                    for p in params {
                        if let Some(name) = p.as_symbol() {
                            self.bind(name);
                        }
                    }
                }
                for &e in &args[1.min(args.len())..] {
                    self.walk(e);
                }
                self.pop_region();
            }
            Some((_, args)) => {
                for e in args {
                    self.walk(e);
                }
            }
            None => {
                if let Some((_, args)) = forms::application(expr) {
                    for e in args {
                        self.walk(e);
                    }
                }
            }
        }
    }

    /// Finish region discovery and compute bulk-free legality against the
    /// function's escape table and alias graph.
    ///
    /// `external_refcount` is the count of aliases whose root lives
    /// outside the owning region but which point at one of its members
    /// (§4.9). This is necessarily an estimate (§9 Open Questions); when
    /// `bulk_free_requires_exact_refcount` is set and any member's true
    /// refcount can't be shown exactly zero by this estimate, the region
    /// degrades to `external_refcount = 1` rather than risk an unsound
    /// bulk-free.
    pub fn finish(mut self, escape: &EscapeTable, aliases: &AliasGraph) -> RegionTable {
        for region in &mut self.regions {
            let members: HashSet<&str> = region.members.iter().map(|s| s.as_str()).collect();

            let has_escaping_refs = region.members.iter().any(|m| {
                escape
                    .escape
                    .get(m)
                    .map(|e| e.class >= EscapeClass::Return)
                    .unwrap_or(false)
                    || escape.usage.get(m).map(|u| u.captured).unwrap_or(false)
            });

            // Count aliases rooted at a member but bound to a name that is
            // itself not a member (an "outside" alias pointing in).
            let inbound_aliases = escape
                .usage
                .keys()
                .filter(|name| !members.contains(name.as_str()))
                .filter(|name| members.contains(aliases.alias_root(name)))
                .count();

            region.has_escaping_refs = has_escaping_refs;
            region.external_refcount = if self.bulk_free_requires_exact_refcount {
                inbound_aliases
            } else {
                // Can't cheaply prove exactness: degrade to never bulk-free
                // unless there are no members at all.
                if region.members.is_empty() {
                    0
                } else {
                    inbound_aliases.max(1)
                }
            };
        }

        RegionTable {
            regions: self.regions,
            region_of: self.region_of,
        }
    }
}
