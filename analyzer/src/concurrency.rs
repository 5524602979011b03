//! Concurrency inferrer (C12, §3.4/§4.12): thread-locality, channel
//! transfer, and atomic-RC requirements for the *target* program's
//! runtime concurrency.

use std::collections::{HashMap, HashSet};

use crate::forms::{self, Expr, Head};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadLocality {
    Unknown,
    ThreadLocal(u64),
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOp {
    Send,
    Recv,
}

#[derive(Debug, Clone)]
pub struct ChannelOpInfo {
    pub op: ChannelOp,
    pub var: Option<String>,
    pub transfers: bool,
}

#[derive(Debug, Clone)]
pub struct ThreadSpawnInfo {
    pub thread_id: u64,
    pub captured: Vec<String>,
}

/// The per-function concurrency table (§3.4).
#[derive(Debug, Default)]
pub struct ConcurrencyTable {
    locality: HashMap<String, ThreadLocality>,
    needs_atomic_rc: HashSet<String>,
    transferred: HashSet<String>,
    pub spawns: Vec<ThreadSpawnInfo>,
    pub channel_ops: Vec<ChannelOpInfo>,
}

impl ConcurrencyTable {
    pub fn thread_locality(&self, name: &str) -> ThreadLocality {
        self.locality.get(name).copied().unwrap_or(ThreadLocality::Unknown)
    }

    pub fn needs_atomic_rc(&self, name: &str) -> bool {
        self.needs_atomic_rc.contains(name)
    }

    pub fn is_channel_transferred(&self, name: &str) -> bool {
        self.transferred.contains(name)
    }
}

/// Walks one function body detecting `spawn`/`send!`/`recv!`/atomic-slot
/// events (§4.12).
pub struct ConcurrencyAnalyzer {
    next_thread_id: u64,
    current_thread: u64,
    scopes: Vec<HashSet<String>>,
    table: ConcurrencyTable,
}

impl ConcurrencyAnalyzer {
    pub fn new() -> Self {
        ConcurrencyAnalyzer {
            next_thread_id: 1,
            current_thread: 0,
            scopes: vec![HashSet::new()],
            table: ConcurrencyTable::default(),
        }
    }

    pub fn finish(self) -> ConcurrencyTable {
        self.table
    }

    fn bind(&mut self, name: &str) {
        self.scopes.last_mut().unwrap().insert(name.to_string());
    }

    fn is_bound(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains(name))
    }

    pub fn walk(&mut self, expr: Expr<'_>) {
        match forms::classify(expr) {
            Some((Head::Quote, _)) => {}
            Some((Head::Let | Head::LetStar | Head::Letrec, args)) => {
                self.scopes.push(HashSet::new());
                if let Some(&bindings_list) = args.first() {
                    for (name, value_expr) in forms::parse_bindings(bindings_list) {
                        // `let [x (recv! ch)]`: the bound variable becomes
                        // thread-local to the current thread (§4.12).
                        if forms::classify(value_expr).map(|(h, _)| h) == Some(Head::Recv) {
                            self.walk(value_expr);
                            self.table.locality.insert(name.to_string(), ThreadLocality::ThreadLocal(self.current_thread));
                        } else {
                            self.walk(value_expr);
                        }
                        self.bind(name);
                    }
                }
                for &body_expr in &args[1.min(args.len())..] {
                    self.walk(body_expr);
                }
                self.scopes.pop();
            }
            Some((Head::Lambda, args)) => {
                self.scopes.push(HashSet::new());
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
                self.scopes.pop();
            }
            Some((Head::Spawn, args)) => {
                let thread_id = self.next_thread_id;
                self.next_thread_id += 1;

                let mut free = HashSet::new();
                for &e in &args {
                    free.extend(crate::freevars::free_symbols(e));
                }
                let captured: Vec<String> = free.iter().filter(|name| self.is_bound(name)).map(|s| s.to_string()).collect();
                for name in &captured {
                    self.table.locality.insert(name.clone(), ThreadLocality::Shared);
                    self.table.needs_atomic_rc.insert(name.clone());
                }
                self.table.spawns.push(ThreadSpawnInfo { thread_id, captured });

                let saved = self.current_thread;
                self.current_thread = thread_id;
                for &e in &args {
                    self.walk(e);
                }
                self.current_thread = saved;
            }
            Some((Head::Send, args)) => {
                let var = args.get(1).and_then(|e| e.as_symbol()).map(|s| s.to_string());
                if let Some(name) = &var {
                    self.table.transferred.insert(name.clone());
                }
                self.table.channel_ops.push(ChannelOpInfo {
                    op: ChannelOp::Send,
                    var,
                    transfers: true,
                });
                for &e in &args {
                    self.walk(e);
                }
            }
            Some((Head::Recv, args)) => {
                self.table.channel_ops.push(ChannelOpInfo {
                    op: ChannelOp::Recv,
                    var: None,
                    transfers: false,
                });
                for &e in &args {
                    self.walk(e);
                }
            }
            Some((Head::Atom | Head::Swap | Head::Reset | Head::CompareAndSwap, args)) => {
                if let Some(name) = args.first().and_then(|e| e.as_symbol()) {
                    self.table.locality.insert(name.to_string(), ThreadLocality::Shared);
                }
                for &e in &args {
                    self.walk(e);
                }
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
}

impl Default for ConcurrencyAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
