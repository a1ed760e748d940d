//! Filtered evaluation of rule bodies
//!
//! Every fact a join considers is passed through a [`LiteralFilter`] together
//! with the role its literal plays in the current evaluation. The role tells
//! the filter which interpretation (before the update, after it, ...) the
//! literal is evaluated in, so one join routine serves deletion, insertion,
//! proving and re-evaluation alike.

use std::ops::ControlFlow;

use crate::equality::EqualityManager;
use crate::error::{CwmError, CwmResult};
use crate::store::{TriplePattern, TripleTable, TupleIndex, TupleStatus};
use crate::term::{ResourceId, Triple};

use super::{normalize, Atom, BodyLiteral, ComponentScope, HeadAtomRef, RuleIndex, RuleInfo, RuleTerm, VariableIndex};

/// The part a body literal plays in an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiteralRole {
    /// Positive literal ordered before the pivot
    PositiveBeforePivot,
    /// Positive literal ordered after the pivot
    PositiveAfterPivot,
    /// Single-atom negation ordered before the pivot negation
    NegativeSingleAtomBeforePivot,
    /// Multi-atom negation ordered before the pivot negation
    NegativeMultipleAtomsBeforePivot,
    /// Negation while a positive literal is the pivot, or one after the pivot negation
    NegativeAtOrAfterPivot,
    /// Atom of the pivot negation ordered before the pivot atom
    UnderlyingBeforePivot,
    /// Atom of the pivot negation ordered after the pivot atom
    UnderlyingAfterPivot,
    /// Positive literal while searching for support of a head
    SupportingPositive,
    /// Negation while searching for support of a head
    SupportingNegative,
    /// Positive literal while re-evaluating a whole rule
    ReevaluationPositive,
    /// Negation while re-evaluating a whole rule
    ReevaluationNegative,
}

/// Where a filtered fact comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyLiteralInfo {
    pub rule: usize,
    pub literal: usize,
    /// Component level of the facts the literal matches
    pub level: usize,
}

/// Decides whether a stored fact counts as present for a body literal
pub trait LiteralFilter: Sync {
    fn accept(
        &self,
        role: LiteralRole,
        info: &BodyLiteralInfo,
        tuple: TupleIndex,
        status: TupleStatus,
    ) -> bool;
}

impl<F> LiteralFilter for F
where
    F: Fn(LiteralRole, &BodyLiteralInfo, TupleIndex, TupleStatus) -> bool + Sync,
{
    fn accept(
        &self,
        role: LiteralRole,
        info: &BodyLiteralInfo,
        tuple: TupleIndex,
        status: TupleStatus,
    ) -> bool {
        self(role, info, tuple, status)
    }
}

/// A fact matched by a body atom
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchedFact {
    pub literal: usize,
    pub tuple: TupleIndex,
    pub triple: Triple,
}

/// Where and how an evaluation reads facts
#[derive(Clone, Copy)]
pub struct Evaluation<'a> {
    pub table: &'a TripleTable,
    pub equality: Option<&'a EqualityManager>,
    pub filter: &'a dyn LiteralFilter,
}

impl<'a> Evaluation<'a> {
    pub fn new(table: &'a TripleTable, filter: &'a dyn LiteralFilter) -> Self {
        Self {
            table,
            equality: None,
            filter,
        }
    }

    /// Compare rule constants modulo `equality`
    pub fn with_equality(mut self, equality: Option<&'a EqualityManager>) -> Self {
        self.equality = equality;
        self
    }
}

type Bindings = Vec<Option<ResourceId>>;

enum Step<'r> {
    Match {
        atom: &'r Atom,
        literal: usize,
        role: LiteralRole,
    },
    Absent {
        atoms: &'r [Atom],
        literal: usize,
        role: LiteralRole,
    },
}

struct Join<'a, 'r> {
    eval: &'a Evaluation<'a>,
    rule: usize,
    info: &'r RuleInfo,
}

type OnMatch<'f> = dyn FnMut(&Bindings, &[MatchedFact]) -> CwmResult<ControlFlow<()>> + 'f;

impl<'a, 'r> Join<'a, 'r> {
    fn literal_info(&self, literal: usize) -> BodyLiteralInfo {
        BodyLiteralInfo {
            rule: self.rule,
            literal,
            level: self.info.literal_levels[literal],
        }
    }

    fn bind(&self, atom: &Atom, triple: &Triple, bindings: &mut Bindings, bound: &mut Vec<VariableIndex>) -> bool {
        for (position, term) in atom.terms.iter().enumerate() {
            let value = triple[position];
            match *term {
                RuleTerm::Constant(c) => {
                    if normalize(self.eval.equality, c) != value {
                        return false;
                    }
                }
                RuleTerm::Variable(v) => match bindings[v] {
                    Some(existing) if existing != value => return false,
                    Some(_) => {}
                    None => {
                        bindings[v] = Some(value);
                        bound.push(v);
                    }
                },
            }
        }
        true
    }

    fn pattern(&self, atom: &Atom, bindings: &Bindings) -> TriplePattern {
        let term = |t: &RuleTerm| match *t {
            RuleTerm::Constant(c) => Some(normalize(self.eval.equality, c)),
            RuleTerm::Variable(v) => bindings[v],
        };
        [term(&atom.terms[0]), term(&atom.terms[1]), term(&atom.terms[2])]
    }

    fn candidates(&self, atom: &Atom, literal: usize, role: LiteralRole, bindings: &Bindings) -> Vec<(TupleIndex, Triple)> {
        let info = self.literal_info(literal);
        self.eval
            .table
            .match_pattern(&self.pattern(atom, bindings))
            .into_iter()
            .filter(|(tuple, _)| {
                let status = self.eval.table.get_tuple_status(*tuple);
                self.eval.filter.accept(role, &info, *tuple, status)
            })
            .collect()
    }

    /// Enumerate every match of `steps`
    fn run_all(
        &self,
        steps: &[Step<'r>],
        bindings: &mut Bindings,
        matched: &mut Vec<MatchedFact>,
        on_match: &mut OnMatch<'_>,
    ) -> CwmResult<()> {
        self.run(steps, bindings, matched, on_match).map(|_| ())
    }

    fn run(
        &self,
        steps: &[Step<'r>],
        bindings: &mut Bindings,
        matched: &mut Vec<MatchedFact>,
        on_match: &mut OnMatch<'_>,
    ) -> CwmResult<ControlFlow<()>> {
        let Some((step, rest)) = steps.split_first() else {
            return on_match(bindings, matched);
        };
        match *step {
            Step::Match { atom, literal, role } => {
                for (tuple, triple) in self.candidates(atom, literal, role, bindings) {
                    let mut bound = Vec::new();
                    if self.bind(atom, &triple, bindings, &mut bound) {
                        matched.push(MatchedFact {
                            literal,
                            tuple,
                            triple,
                        });
                        let flow = self.run(rest, bindings, matched, on_match);
                        matched.pop();
                        unbind(bindings, &bound);
                        if flow?.is_break() {
                            return Ok(ControlFlow::Break(()));
                        }
                    } else {
                        unbind(bindings, &bound);
                    }
                }
                Ok(ControlFlow::Continue(()))
            }
            Step::Absent {
                atoms,
                literal,
                role,
            } => {
                if self.exists(atoms, literal, role, bindings) {
                    Ok(ControlFlow::Continue(()))
                } else {
                    self.run(rest, bindings, matched, on_match)
                }
            }
        }
    }

    fn exists(&self, atoms: &[Atom], literal: usize, role: LiteralRole, bindings: &mut Bindings) -> bool {
        let Some((atom, rest)) = atoms.split_first() else {
            return true;
        };
        for (_, triple) in self.candidates(atom, literal, role, bindings) {
            let mut bound = Vec::new();
            let found = self.bind(atom, &triple, bindings, &mut bound) && self.exists(rest, literal, role, bindings);
            unbind(bindings, &bound);
            if found {
                return true;
            }
        }
        false
    }

    fn instantiate(&self, atom: &Atom, bindings: &Bindings) -> CwmResult<Triple> {
        let mut triple = [0; 3];
        for (position, term) in atom.terms.iter().enumerate() {
            triple[position] = match *term {
                RuleTerm::Constant(c) => normalize(self.eval.equality, c),
                RuleTerm::Variable(v) => bindings[v].ok_or_else(|| {
                    CwmError::invariant_violation(format!(
                        "head variable {} of rule {} is unbound",
                        v, self.rule
                    ))
                })?,
            };
        }
        Ok(triple)
    }

    fn emit_heads(
        &self,
        bindings: &Bindings,
        consumer: &mut dyn FnMut(usize, Triple) -> CwmResult<()>,
    ) -> CwmResult<ControlFlow<()>> {
        for atom in &self.info.rule.head {
            consumer(self.rule, self.instantiate(atom, bindings)?)?;
        }
        Ok(ControlFlow::Continue(()))
    }
}

fn unbind(bindings: &mut Bindings, bound: &[VariableIndex]) {
    for &v in bound {
        bindings[v] = None;
    }
}

impl RuleIndex {
    /// Evaluate every rule in `scope` with `triple` matched to one of its
    /// positive body atoms and pass each instantiated head to `consumer`.
    ///
    /// The pivot fact itself is not filtered.
    pub fn apply_rules_to_positive_literal(
        &self,
        eval: &Evaluation<'_>,
        tuple: TupleIndex,
        triple: &Triple,
        scope: ComponentScope,
        consumer: &mut dyn FnMut(usize, Triple) -> CwmResult<()>,
    ) -> CwmResult<()> {
        for (rule, info) in self.in_scope(scope) {
            let join = Join { eval, rule, info };
            for (pivot, literal) in info.rule.body.iter().enumerate() {
                let BodyLiteral::Positive(atom) = literal else {
                    continue;
                };
                let mut bindings = vec![None; info.rule.variable_count()];
                if !join.bind(atom, triple, &mut bindings, &mut Vec::new()) {
                    continue;
                }
                let steps: Vec<Step<'_>> = info
                    .rule
                    .body
                    .iter()
                    .enumerate()
                    .filter(|(index, _)| *index != pivot)
                    .map(|(index, literal)| match literal {
                        BodyLiteral::Positive(atom) => Step::Match {
                            atom,
                            literal: index,
                            role: if index < pivot {
                                LiteralRole::PositiveBeforePivot
                            } else {
                                LiteralRole::PositiveAfterPivot
                            },
                        },
                        BodyLiteral::Negative(atoms) => Step::Absent {
                            atoms,
                            literal: index,
                            role: LiteralRole::NegativeAtOrAfterPivot,
                        },
                    })
                    .collect();
                let mut matched = vec![MatchedFact {
                    literal: pivot,
                    tuple,
                    triple: *triple,
                }];
                join.run_all(&steps, &mut bindings, &mut matched, &mut |b, _| {
                    join.emit_heads(b, consumer)
                })?;
            }
        }
        Ok(())
    }

    /// Evaluate every rule in `scope` with `triple` matched to an atom of one
    /// of its negations, so that the negation is the pivot. The remaining
    /// atoms of that negation are matched positively as underlying atoms.
    pub fn apply_rules_to_negation_literal(
        &self,
        eval: &Evaluation<'_>,
        triple: &Triple,
        scope: ComponentScope,
        consumer: &mut dyn FnMut(usize, Triple) -> CwmResult<()>,
    ) -> CwmResult<()> {
        for (rule, info) in self.in_scope(scope) {
            let join = Join { eval, rule, info };
            for (pivot, literal) in info.rule.body.iter().enumerate() {
                let BodyLiteral::Negative(pivot_atoms) = literal else {
                    continue;
                };
                for (pivot_atom_index, pivot_atom) in pivot_atoms.iter().enumerate() {
                    let mut bindings = vec![None; info.rule.variable_count()];
                    if !join.bind(pivot_atom, triple, &mut bindings, &mut Vec::new()) {
                        continue;
                    }

                    let underlying = pivot_atoms
                        .iter()
                        .enumerate()
                        .filter(|(index, _)| *index != pivot_atom_index)
                        .map(|(index, atom)| Step::Match {
                            atom,
                            literal: pivot,
                            role: if index < pivot_atom_index {
                                LiteralRole::UnderlyingBeforePivot
                            } else {
                                LiteralRole::UnderlyingAfterPivot
                            },
                        });
                    let others = info
                        .rule
                        .body
                        .iter()
                        .enumerate()
                        .filter(|(index, _)| *index != pivot)
                        .map(|(index, literal)| match literal {
                            BodyLiteral::Positive(atom) => Step::Match {
                                atom,
                                literal: index,
                                role: LiteralRole::PositiveBeforePivot,
                            },
                            BodyLiteral::Negative(atoms) => Step::Absent {
                                atoms,
                                literal: index,
                                role: if index > pivot {
                                    LiteralRole::NegativeAtOrAfterPivot
                                } else if atoms.len() == 1 {
                                    LiteralRole::NegativeSingleAtomBeforePivot
                                } else {
                                    LiteralRole::NegativeMultipleAtomsBeforePivot
                                },
                            },
                        });
                    let steps: Vec<Step<'_>> = underlying.chain(others).collect();

                    let mut matched = Vec::new();
                    join.run_all(&steps, &mut bindings, &mut matched, &mut |b, _| {
                        join.emit_heads(b, consumer)
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Evaluate one whole rule and pass each instantiated head to `consumer`
    pub fn evaluate_rule(
        &self,
        eval: &Evaluation<'_>,
        rule: usize,
        consumer: &mut dyn FnMut(usize, Triple) -> CwmResult<()>,
    ) -> CwmResult<()> {
        let info = &self.rules[rule];
        let join = Join { eval, rule, info };
        let steps: Vec<Step<'_>> = info
            .rule
            .body
            .iter()
            .enumerate()
            .map(|(index, literal)| match literal {
                BodyLiteral::Positive(atom) => Step::Match {
                    atom,
                    literal: index,
                    role: LiteralRole::ReevaluationPositive,
                },
                BodyLiteral::Negative(atoms) => Step::Absent {
                    atoms,
                    literal: index,
                    role: LiteralRole::ReevaluationNegative,
                },
            })
            .collect();
        let mut bindings = vec![None; info.rule.variable_count()];
        join.run_all(&steps, &mut bindings, &mut Vec::new(), &mut |b, _| {
            join.emit_heads(b, consumer)
        })?;
        Ok(())
    }

    fn supporting_steps(info: &RuleInfo) -> Vec<Step<'_>> {
        info.rule
            .body
            .iter()
            .enumerate()
            .map(|(index, literal)| match literal {
                BodyLiteral::Positive(atom) => Step::Match {
                    atom,
                    literal: index,
                    role: LiteralRole::SupportingPositive,
                },
                BodyLiteral::Negative(atoms) => Step::Absent {
                    atoms,
                    literal: index,
                    role: LiteralRole::SupportingNegative,
                },
            })
            .collect()
    }

    /// Every body instance deriving `triple` through `head`; each instance
    /// lists the facts matched by the positive body atoms
    pub fn supporting_instances(
        &self,
        eval: &Evaluation<'_>,
        head: HeadAtomRef,
        triple: &Triple,
    ) -> CwmResult<Vec<Vec<MatchedFact>>> {
        let info = &self.rules[head.rule];
        let join = Join {
            eval,
            rule: head.rule,
            info,
        };
        let mut bindings = vec![None; info.rule.variable_count()];
        if !join.bind(&info.rule.head[head.head], triple, &mut bindings, &mut Vec::new()) {
            return Ok(Vec::new());
        }
        let mut instances = Vec::new();
        join.run_all(
            &Self::supporting_steps(info),
            &mut bindings,
            &mut Vec::new(),
            &mut |_, matched| {
                instances.push(matched.to_vec());
                Ok(ControlFlow::Continue(()))
            },
        )?;
        Ok(instances)
    }

    /// Whether some body instance derives `triple` through `head`
    pub fn has_supporting_instance(
        &self,
        eval: &Evaluation<'_>,
        head: HeadAtomRef,
        triple: &Triple,
    ) -> CwmResult<bool> {
        let info = &self.rules[head.rule];
        let join = Join {
            eval,
            rule: head.rule,
            info,
        };
        let mut bindings = vec![None; info.rule.variable_count()];
        if !join.bind(&info.rule.head[head.head], triple, &mut bindings, &mut Vec::new()) {
            return Ok(false);
        }
        let flow = join.run(
            &Self::supporting_steps(info),
            &mut bindings,
            &mut Vec::new(),
            &mut |_, _| Ok(ControlFlow::Break(())),
        )?;
        Ok(flow.is_break())
    }

    /// Whether any rule derives `triple` from facts accepted by the filter
    pub fn is_derivable(&self, eval: &Evaluation<'_>, triple: &Triple) -> CwmResult<bool> {
        for head in self.all_matching_head_atoms(triple, eval.equality) {
            if self.has_supporting_instance(eval, head, triple)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether a nonrecursive rule in `scope` derives `triple`
    pub fn proved_by_nonrecursive_rule(
        &self,
        eval: &Evaluation<'_>,
        triple: &Triple,
        scope: ComponentScope,
    ) -> CwmResult<bool> {
        if !self.has_nonrecursive_rules(scope) {
            return Ok(false);
        }
        for head in self.all_matching_head_atoms(triple, eval.equality) {
            let info = &self.rules[head.rule];
            if scope.includes(info.rule.level)
                && !info.recursive
                && self.has_supporting_instance(eval, head, triple)?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether a pivotless rule in `scope` has `triple` itself as a ground head
    pub fn is_pivotless_fact(&self, triple: &Triple, scope: ComponentScope) -> bool {
        self.in_scope(scope)
            .filter(|(_, info)| info.rule.is_pivotless())
            .flat_map(|(_, info)| info.rule.head.iter())
            .any(|atom| {
                atom.terms
                    .iter()
                    .zip(triple.iter())
                    .all(|(term, value)| *term == RuleTerm::Constant(*value))
            })
    }
}
