//! Compilation of element content models into deterministic automata
//!
//! A `children` content model is a regular expression over element names.  It is compiled by
//! first building the Glushkov (position) automaton, in which each occurrence of a name in the
//! model is a distinct state, and then applying the subset construction.  XML requires the
//! position automaton itself to be deterministic; models for which it is not are reported, but
//! the subset construction still gives a correct recogniser for them, unless it would exceed
//! `MAX_DFA_STATES`, in which case the model matches nothing.

use pullxml_syntax::types::{ContentParticle, Occurrence, Particle};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone)]
struct DfaState {
    transitions: BTreeMap<String, usize>,
    accepting: bool,
}

#[derive(Debug, Clone)]
pub struct Dfa {
    states: Vec<DfaState>,
}

pub type StateId = usize;

/// Bound on the subset construction.  A deterministic model never needs more states than it has
/// positions, plus one.
pub const MAX_DFA_STATES: usize = 10_000;

impl Dfa {
    /// Compiles the given model, also returning `false` if the model is not deterministic
    pub fn compile(model: &ContentParticle) -> (Dfa, bool) {
        let mut g = Glushkov::default();
        let root = g.particle(model);
        // position `start` stands for the state before any child has been seen
        let start = g.symbols.len();
        g.follow.push(root.first.clone());
        let mut last = root.last;
        if root.nullable {
            last.insert(start);
        }

        let deterministic = g.follow.iter().all(|set| g.is_unambiguous(set));
        let limit = MAX_DFA_STATES.max(start + 1);

        let mut states = vec![];
        let mut index: HashMap<BTreeSet<usize>, usize> = HashMap::new();
        let mut pending = vec![];
        let initial: BTreeSet<usize> = std::iter::once(start).collect();
        index.insert(initial.clone(), 0);
        states.push(DfaState {
            transitions: BTreeMap::new(),
            accepting: root.nullable,
        });
        pending.push(initial);
        while let Some(set) = pending.pop() {
            let id = index[&set];
            let mut targets: BTreeMap<&str, BTreeSet<usize>> = BTreeMap::new();
            for &p in &set {
                for &q in &g.follow[p] {
                    targets.entry(g.symbols[q].as_str()).or_default().insert(q);
                }
            }
            for (symbol, target) in targets {
                let next = match index.get(&target) {
                    Some(&n) => n,
                    None if states.len() >= limit => return (Dfa::rejecting(), false),
                    None => {
                        let n = states.len();
                        states.push(DfaState {
                            transitions: BTreeMap::new(),
                            accepting: target.iter().any(|p| last.contains(p)),
                        });
                        index.insert(target.clone(), n);
                        pending.push(target);
                        n
                    }
                };
                states[id].transitions.insert(symbol.to_string(), next);
            }
        }
        (Dfa { states }, deterministic)
    }

    /// An automaton accepting no sequence at all, not even the empty one
    fn rejecting() -> Dfa {
        Dfa {
            states: vec![DfaState {
                transitions: BTreeMap::new(),
                accepting: false,
            }],
        }
    }

    pub fn start(&self) -> StateId {
        0
    }

    pub fn step(&self, state: StateId, name: &str) -> Option<StateId> {
        self.states[state].transitions.get(name).copied()
    }

    pub fn is_accepting(&self, state: StateId) -> bool {
        self.states[state].accepting
    }

    /// The element names which may follow in the given state
    pub fn expected(&self, state: StateId) -> impl Iterator<Item = &str> {
        self.states[state].transitions.keys().map(|k| k.as_str())
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }
}

struct Info {
    nullable: bool,
    first: BTreeSet<usize>,
    last: BTreeSet<usize>,
}

#[derive(Default)]
struct Glushkov {
    /// the element name at each position
    symbols: Vec<String>,
    /// positions which may immediately follow each position
    follow: Vec<BTreeSet<usize>>,
}

impl Glushkov {
    fn particle(&mut self, cp: &ContentParticle) -> Info {
        let mut info = match &cp.particle {
            Particle::Name(name) => {
                let pos = self.symbols.len();
                self.symbols.push(name.clone());
                self.follow.push(BTreeSet::new());
                let set: BTreeSet<usize> = std::iter::once(pos).collect();
                Info {
                    nullable: false,
                    first: set.clone(),
                    last: set,
                }
            }
            Particle::Seq(items) => {
                let mut acc = Info {
                    nullable: true,
                    first: BTreeSet::new(),
                    last: BTreeSet::new(),
                };
                for item in items {
                    let next = self.particle(item);
                    for &l in &acc.last {
                        self.follow[l].extend(next.first.iter().copied());
                    }
                    if acc.nullable {
                        acc.first.extend(next.first.iter().copied());
                    }
                    if next.nullable {
                        acc.last.extend(next.last);
                    } else {
                        acc.last = next.last;
                    }
                    acc.nullable &= next.nullable;
                }
                acc
            }
            Particle::Choice(items) => {
                let mut acc = Info {
                    nullable: false,
                    first: BTreeSet::new(),
                    last: BTreeSet::new(),
                };
                for item in items {
                    let next = self.particle(item);
                    acc.nullable |= next.nullable;
                    acc.first.extend(next.first);
                    acc.last.extend(next.last);
                }
                acc
            }
        };
        match cp.occurrence {
            Occurrence::Once => (),
            Occurrence::Optional => info.nullable = true,
            Occurrence::ZeroOrMore | Occurrence::OneOrMore => {
                for &l in &info.last {
                    self.follow[l].extend(info.first.iter().copied());
                }
                if cp.occurrence == Occurrence::ZeroOrMore {
                    info.nullable = true;
                }
            }
        }
        info
    }

    /// no two positions in the set are labelled with the same element name
    fn is_unambiguous(&self, set: &BTreeSet<usize>) -> bool {
        let mut seen = BTreeSet::new();
        set.iter().all(|&p| seen.insert(self.symbols[p].as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pullxml_syntax::dtd::parse_markup_decl;
    use pullxml_syntax::types::{ContentSpec, MarkupDecl};

    fn compile(model: &str) -> (Dfa, bool) {
        let decl = format!("<!ELEMENT x {}>", model);
        match parse_markup_decl(&decl).unwrap() {
            MarkupDecl::Element(e) => match e.content {
                ContentSpec::Children(cp) => Dfa::compile(&cp),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    fn accepts(dfa: &Dfa, children: &[&str]) -> bool {
        let mut state = dfa.start();
        for child in children {
            match dfa.step(state, child) {
                Some(s) => state = s,
                None => return false,
            }
        }
        dfa.is_accepting(state)
    }

    #[test]
    fn sequence() {
        let (dfa, det) = compile("(a, b?, c+)");
        assert!(det);
        assert!(accepts(&dfa, &["a", "c"]));
        assert!(accepts(&dfa, &["a", "b", "c", "c"]));
        assert!(!accepts(&dfa, &["a", "b"]));
        assert!(!accepts(&dfa, &["b", "c"]));
        assert!(!accepts(&dfa, &[]));
    }

    #[test]
    fn nested_repetition() {
        let (dfa, det) = compile("(head, (p | list)*)");
        assert!(det);
        assert!(accepts(&dfa, &["head"]));
        assert!(accepts(&dfa, &["head", "p", "list", "p"]));
        assert!(!accepts(&dfa, &["head", "head"]));
        let mut expected: Vec<&str> = dfa.expected(dfa.step(dfa.start(), "head").unwrap()).collect();
        expected.sort_unstable();
        assert_eq!(expected, vec!["list", "p"]);
    }

    #[test]
    fn nullable_model() {
        let (dfa, _) = compile("(a?, b*)");
        assert!(accepts(&dfa, &[]));
        assert!(accepts(&dfa, &["b", "b"]));
        assert!(!accepts(&dfa, &["b", "a"]));
    }

    #[test]
    fn ambiguous_model_still_recognised() {
        // after an 'a' it is not known which branch has been taken
        let (dfa, det) = compile("((a, b) | (a, c))");
        assert!(!det);
        assert!(accepts(&dfa, &["a", "b"]));
        assert!(accepts(&dfa, &["a", "c"]));
        assert!(!accepts(&dfa, &["a"]));

        let (_, det) = compile("(a*, a)");
        assert!(!det);
    }

    #[test]
    fn exponential_model_bounded() {
        // the subset construction must remember the last 15 names
        let model = format!("((a | b)*, a{})", ", (a | b)".repeat(14));
        let (dfa, det) = compile(&model);
        assert!(!det);
        assert_eq!(dfa.state_count(), 1);
        assert!(!accepts(&dfa, &[]));
        assert!(!accepts(&dfa, &["a"; 15]));

        let wide = format!("({})", (0..12_000).map(|i| format!("e{}", i)).collect::<Vec<_>>().join(", "));
        let (dfa, det) = compile(&wide);
        assert!(det);
        assert_eq!(dfa.state_count(), 12_001);
    }
}
