//! Datalog rules over triples and the rule index used by maintenance
//!
//! A rule has one or more head atoms and a body of positive atoms and
//! negated conjunctions (`not a & b`, meaning "no match of `a` and `b`
//! exists"). Every rule carries the stratification level it belongs to.
//!
//! # Text syntax
//!
//! ```text
//! ?x a :C :- ?x a :B , not ?x :p ?y & ?y a :D
//! ```
//!
//! Terms starting with `?` are variables; everything else is a resource in
//! the compact form accepted by [`Resource::parse`](crate::term::Resource::parse).
//! Variables that occur only inside one negated conjunction are local to it.

mod join;

pub use join::{BodyLiteralInfo, Evaluation, LiteralFilter, LiteralRole, MatchedFact};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::equality::EqualityManager;
use crate::error::{CwmError, CwmResult};
use crate::term::{Dictionary, ResourceId, Triple};

/// Index of a variable within its rule
pub type VariableIndex = usize;

/// A position in an atom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleTerm {
    Variable(VariableIndex),
    Constant(ResourceId),
}

impl RuleTerm {
    pub fn is_variable(&self) -> bool {
        matches!(self, RuleTerm::Variable(_))
    }
}

/// A triple pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Atom {
    pub terms: [RuleTerm; 3],
}

impl Atom {
    pub fn new(subject: RuleTerm, predicate: RuleTerm, object: RuleTerm) -> Self {
        Self {
            terms: [subject, predicate, object],
        }
    }

    /// Bitmask of the positions holding constants; the atom's indexing pattern
    pub fn indexing_pattern(&self) -> usize {
        self.terms
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_variable())
            .fold(0, |mask, (position, _)| mask | (1 << position))
    }

    pub fn variables(&self) -> impl Iterator<Item = VariableIndex> + '_ {
        self.terms.iter().filter_map(|t| match t {
            RuleTerm::Variable(v) => Some(*v),
            RuleTerm::Constant(_) => None,
        })
    }

    /// Whether some triple could match both atoms
    pub fn unifies_with(&self, other: &Atom) -> bool {
        self.terms
            .iter()
            .zip(other.terms.iter())
            .all(|pair| match pair {
                (RuleTerm::Constant(a), RuleTerm::Constant(b)) => a == b,
                _ => true,
            })
    }

    /// Whether `triple` is an instance of this atom, with constants compared
    /// modulo `equality`
    pub fn matches(&self, triple: &Triple, equality: Option<&EqualityManager>) -> bool {
        let mut seen: [Option<(VariableIndex, ResourceId)>; 3] = [None; 3];
        for (position, term) in self.terms.iter().enumerate() {
            match *term {
                RuleTerm::Constant(c) => {
                    if normalize(equality, c) != triple[position] {
                        return false;
                    }
                }
                RuleTerm::Variable(v) => {
                    if seen
                        .iter()
                        .flatten()
                        .any(|&(w, value)| w == v && value != triple[position])
                    {
                        return false;
                    }
                    seen[position] = Some((v, triple[position]));
                }
            }
        }
        true
    }
}

pub(crate) fn normalize(equality: Option<&EqualityManager>, id: ResourceId) -> ResourceId {
    equality.map_or(id, |em| em.normalize(id))
}

/// One conjunct of a rule body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyLiteral {
    Positive(Atom),
    /// Holds iff no joint match of all atoms exists
    Negative(Vec<Atom>),
}

impl BodyLiteral {
    pub fn is_positive(&self) -> bool {
        matches!(self, BodyLiteral::Positive(_))
    }

    pub fn atoms(&self) -> &[Atom] {
        match self {
            BodyLiteral::Positive(atom) => std::slice::from_ref(atom),
            BodyLiteral::Negative(atoms) => atoms,
        }
    }
}

/// A safe Datalog rule with its stratification level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    head: Vec<Atom>,
    body: Vec<BodyLiteral>,
    level: usize,
    variables: Vec<String>,
}

impl Rule {
    /// Build a rule, checking safety and moving negated literals after the
    /// positive ones
    pub fn new(head: Vec<Atom>, body: Vec<BodyLiteral>, variables: Vec<String>) -> CwmResult<Self> {
        if head.is_empty() {
            return Err(CwmError::unsafe_rule("a rule needs at least one head atom"));
        }

        let (positive, negative): (Vec<_>, Vec<_>) =
            body.into_iter().partition(BodyLiteral::is_positive);
        let body: Vec<BodyLiteral> = positive.into_iter().chain(negative).collect();

        let bound: Vec<VariableIndex> = body
            .iter()
            .filter(|l| l.is_positive())
            .flat_map(|l| l.atoms().iter().flat_map(Atom::variables))
            .collect();

        let name = |v: VariableIndex| variables.get(v).cloned().unwrap_or_else(|| format!("#{}", v));

        for atom in &head {
            if let Some(v) = atom.variables().find(|v| !bound.contains(v)) {
                return Err(CwmError::unsafe_rule(format!(
                    "head variable ?{} does not occur in a positive body atom",
                    name(v)
                )));
            }
        }

        // A variable of a negated conjunction is either bound positively or
        // local to that one conjunction.
        for (index, literal) in body.iter().enumerate() {
            if let BodyLiteral::Negative(atoms) = literal {
                for v in atoms.iter().flat_map(Atom::variables) {
                    if bound.contains(&v) {
                        continue;
                    }
                    let shared = body.iter().enumerate().any(|(other, l)| {
                        other != index && l.atoms().iter().any(|a| a.variables().any(|w| w == v))
                    });
                    if shared {
                        return Err(CwmError::unsafe_rule(format!(
                            "variable ?{} is shared by negated literals but never bound",
                            name(v)
                        )));
                    }
                }
            }
        }

        Ok(Self {
            head,
            body,
            level: 0,
            variables,
        })
    }

    /// Set the stratification level
    pub fn at_level(mut self, level: usize) -> Self {
        self.level = level;
        self
    }

    /// Parse the text syntax, interning constants into `dictionary`
    pub fn parse(text: &str, dictionary: &mut Dictionary) -> CwmResult<Self> {
        let text = text.trim().trim_end_matches('.').trim();
        let (head_text, body_text) = text
            .split_once(":-")
            .ok_or_else(|| CwmError::validation(format!("rule '{}' has no ':-'", text)))?;

        let mut variables = Vec::new();

        let head = head_text
            .split(',')
            .map(|a| parse_atom(a, dictionary, &mut variables))
            .collect::<CwmResult<Vec<_>>>()?;

        let mut body = Vec::new();
        for literal in body_text.split(',').map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(rest) = literal.strip_prefix("not ") {
                let atoms = rest
                    .split('&')
                    .map(|a| parse_atom(a, dictionary, &mut variables))
                    .collect::<CwmResult<Vec<_>>>()?;
                body.push(BodyLiteral::Negative(atoms));
            } else {
                body.push(BodyLiteral::Positive(parse_atom(
                    literal,
                    dictionary,
                    &mut variables,
                )?));
            }
        }

        Self::new(head, body, variables)
    }

    pub fn head(&self) -> &[Atom] {
        &self.head
    }

    pub fn body(&self) -> &[BodyLiteral] {
        &self.body
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    pub fn has_negation(&self) -> bool {
        self.body.iter().any(|l| !l.is_positive())
    }

    /// A rule without positive body atoms cannot be triggered by a fact
    pub fn is_pivotless(&self) -> bool {
        !self.body.iter().any(BodyLiteral::is_positive)
    }

    /// Whether any constant of the rule is in the class of `resource`
    pub fn mentions(&self, resource: ResourceId, equality: Option<&EqualityManager>) -> bool {
        let target = normalize(equality, resource);
        self.head
            .iter()
            .chain(self.body.iter().flat_map(|l| l.atoms().iter()))
            .flat_map(|a| a.terms.iter())
            .any(|t| matches!(*t, RuleTerm::Constant(c) if normalize(equality, c) == target))
    }

    /// Render with resource names from `dictionary`
    pub fn display<'a>(&'a self, dictionary: &'a Dictionary) -> RuleDisplay<'a> {
        RuleDisplay {
            rule: self,
            dictionary,
        }
    }
}

fn parse_atom(
    text: &str,
    dictionary: &mut Dictionary,
    variables: &mut Vec<String>,
) -> CwmResult<Atom> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() != 3 {
        return Err(CwmError::validation(format!(
            "atom '{}' must have exactly three terms",
            text.trim()
        )));
    }
    let mut term = |token: &str| match token.strip_prefix('?') {
        Some(name) => {
            let index = match variables.iter().position(|v| v == name) {
                Some(index) => index,
                None => {
                    variables.push(name.to_string());
                    variables.len() - 1
                }
            };
            RuleTerm::Variable(index)
        }
        None => RuleTerm::Constant(dictionary.intern_str(token)),
    };
    Ok(Atom::new(term(tokens[0]), term(tokens[1]), term(tokens[2])))
}

/// Display adapter returned by [`Rule::display`]
pub struct RuleDisplay<'a> {
    rule: &'a Rule,
    dictionary: &'a Dictionary,
}

impl RuleDisplay<'_> {
    fn atom(&self, atom: &Atom) -> String {
        atom.terms
            .iter()
            .map(|t| match *t {
                RuleTerm::Variable(v) => format!("?{}", self.rule.variables[v]),
                RuleTerm::Constant(c) => self.dictionary.display(c),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for RuleDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head: Vec<String> = self.rule.head.iter().map(|a| self.atom(a)).collect();
        let body: Vec<String> = self
            .rule
            .body
            .iter()
            .map(|l| match l {
                BodyLiteral::Positive(a) => self.atom(a),
                BodyLiteral::Negative(atoms) => format!(
                    "not {}",
                    atoms.iter().map(|a| self.atom(a)).collect::<Vec<_>>().join(" & ")
                ),
            })
            .collect();
        write!(f, "{} :- {}", head.join(" , "), body.join(" , "))
    }
}

// ============================================================================
// Rule index
// ============================================================================

/// Which rules an application considers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentScope {
    AllComponents,
    InComponent(usize),
}

impl ComponentScope {
    /// `None` means levels are not in use
    pub fn from_level(level: Option<usize>) -> Self {
        match level {
            Some(level) => ComponentScope::InComponent(level),
            None => ComponentScope::AllComponents,
        }
    }

    pub fn includes(&self, level: usize) -> bool {
        match self {
            ComponentScope::AllComponents => true,
            ComponentScope::InComponent(l) => *l == level,
        }
    }
}

/// A head atom of an indexed rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HeadAtomRef {
    pub rule: usize,
    pub head: usize,
}

#[derive(Debug, Clone)]
struct RuleInfo {
    rule: Rule,
    recursive: bool,
    literal_levels: Vec<usize>,
    supporting: Vec<bool>,
}

/// Rules indexed for incremental maintenance
#[derive(Debug, Clone, Default)]
pub struct RuleIndex {
    rules: Vec<RuleInfo>,
    heads_by_pattern: [Vec<HeadAtomRef>; 8],
    by_levels: bool,
}

impl RuleIndex {
    /// Index `rules`. With `by_levels`, the rule levels are checked to form a
    /// stratification.
    pub fn build(rules: Vec<Rule>, by_levels: bool) -> CwmResult<Self> {
        let head_level = |atom: &Atom| {
            rules
                .iter()
                .filter(|r| r.head.iter().any(|h| h.unifies_with(atom)))
                .map(|r| r.level)
                .max()
                .unwrap_or(0)
        };

        let mut infos = Vec::with_capacity(rules.len());
        for (index, rule) in rules.iter().enumerate() {
            let literal_levels: Vec<usize> = rule
                .body
                .iter()
                .map(|l| l.atoms().iter().map(head_level).max().unwrap_or(0))
                .collect();

            if by_levels {
                for (other_index, other) in rules.iter().enumerate().skip(index + 1) {
                    let overlap = rule
                        .head
                        .iter()
                        .any(|h| other.head.iter().any(|g| g.unifies_with(h)));
                    if overlap && other.level != rule.level {
                        return Err(CwmError::invalid_stratification(format!(
                            "rules {} and {} derive overlapping facts at levels {} and {}",
                            index, other_index, rule.level, other.level
                        ))
                        .with_hint("rules whose heads unify must share a level"));
                    }
                }
                for (literal, level) in rule.body.iter().zip(&literal_levels) {
                    let valid = if literal.is_positive() {
                        *level <= rule.level
                    } else {
                        *level < rule.level
                    };
                    if !valid {
                        return Err(CwmError::invalid_stratification(format!(
                            "rule {} at level {} depends on level {}",
                            index, rule.level, level
                        ))
                        .with_context("rule", index.to_string()));
                    }
                }
            }

            let supporting: Vec<bool> = rule
                .body
                .iter()
                .zip(&literal_levels)
                .map(|(l, level)| l.is_positive() && (!by_levels || *level == rule.level))
                .collect();
            let recursive = supporting.iter().any(|s| *s);

            infos.push(RuleInfo {
                rule: rule.clone(),
                recursive,
                literal_levels,
                supporting,
            });
        }

        let mut heads_by_pattern: [Vec<HeadAtomRef>; 8] = Default::default();
        for (rule, info) in infos.iter().enumerate() {
            for (head, atom) in info.rule.head.iter().enumerate() {
                heads_by_pattern[atom.indexing_pattern()].push(HeadAtomRef { rule, head });
            }
        }

        Ok(Self {
            rules: infos,
            heads_by_pattern,
            by_levels,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn by_levels(&self) -> bool {
        self.by_levels
    }

    pub fn rule(&self, index: usize) -> &Rule {
        &self.rules[index].rule
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().map(|info| &info.rule)
    }

    fn in_scope(&self, scope: ComponentScope) -> impl Iterator<Item = (usize, &RuleInfo)> {
        self.rules
            .iter()
            .enumerate()
            .filter(move |(_, info)| scope.includes(info.rule.level))
    }

    pub fn has_rules(&self, scope: ComponentScope) -> bool {
        self.in_scope(scope).next().is_some()
    }

    pub fn has_rules_with_negation(&self, scope: ComponentScope) -> bool {
        self.in_scope(scope).any(|(_, info)| info.rule.has_negation())
    }

    pub fn has_recursive_rules(&self, scope: ComponentScope) -> bool {
        self.in_scope(scope).any(|(_, info)| info.recursive)
    }

    pub fn has_nonrecursive_rules(&self, scope: ComponentScope) -> bool {
        self.in_scope(scope).any(|(_, info)| !info.recursive)
    }

    pub fn has_pivotless_rules(&self, scope: ComponentScope) -> bool {
        self.in_scope(scope).any(|(_, info)| info.rule.is_pivotless())
    }

    /// Whether a rule has a positive body atom in its own component
    pub fn is_recursive(&self, rule: usize) -> bool {
        self.rules[rule].recursive
    }

    /// Whether body literal `literal` of `rule` is searched when proving a head
    pub fn is_supporting_body_atom(&self, rule: usize, literal: usize) -> bool {
        self.rules[rule].supporting[literal]
    }

    /// Level of the facts a body literal matches
    pub fn literal_level(&self, rule: usize, literal: usize) -> usize {
        self.rules[rule].literal_levels[literal]
    }

    /// Highest rule level; `0` without rules
    pub fn max_component_level(&self) -> usize {
        self.rules.iter().map(|i| i.rule.level).max().unwrap_or(0)
    }

    /// Level of the component a fact belongs to: the highest level of a rule
    /// that can derive it, or `0`
    pub fn component_level(&self, triple: &Triple) -> usize {
        self.rules
            .iter()
            .filter(|info| info.rule.head.iter().any(|h| h.matches(triple, None)))
            .map(|info| info.rule.level)
            .max()
            .unwrap_or(0)
    }

    /// Head atoms with indexing pattern `pattern` that `triple` is an instance of
    pub fn matching_head_atoms(
        &self,
        triple: &Triple,
        pattern: usize,
        equality: Option<&EqualityManager>,
    ) -> Vec<HeadAtomRef> {
        self.heads_by_pattern[pattern & 7]
            .iter()
            .filter(|h| self.rules[h.rule].rule.head[h.head].matches(triple, equality))
            .copied()
            .collect()
    }

    /// Head atoms across all eight indexing patterns
    pub fn all_matching_head_atoms(
        &self,
        triple: &Triple,
        equality: Option<&EqualityManager>,
    ) -> Vec<HeadAtomRef> {
        (0..8)
            .flat_map(|pattern| self.matching_head_atoms(triple, pattern, equality))
            .collect()
    }

    /// Rules in `scope` with a constant in the class of `resource`
    pub fn rules_mentioning(
        &self,
        resource: ResourceId,
        scope: ComponentScope,
        equality: Option<&EqualityManager>,
    ) -> Vec<usize> {
        self.in_scope(scope)
            .filter(|(_, info)| info.rule.mentions(resource, equality))
            .map(|(index, _)| index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str, dict: &mut Dictionary, level: usize) -> Rule {
        Rule::parse(text, dict).unwrap().at_level(level)
    }

    #[test]
    fn test_parse_rule() {
        let mut dict = Dictionary::new();
        let rule = Rule::parse("?x a C :- ?x a B , not ?x p ?y & ?y a D .", &mut dict).unwrap();
        assert_eq!(rule.head().len(), 1);
        assert_eq!(rule.body().len(), 2);
        assert!(rule.has_negation());
        assert_eq!(rule.variable_count(), 2);
        assert_eq!(
            rule.display(&dict).to_string(),
            "?x rdf:type C :- ?x rdf:type B , not ?x p ?y & ?y rdf:type D"
        );
    }

    #[test]
    fn test_negation_moves_last() {
        let mut dict = Dictionary::new();
        let rule = Rule::parse("?x a C :- not ?x a D , ?x a B", &mut dict).unwrap();
        assert!(rule.body()[0].is_positive());
        assert!(!rule.body()[1].is_positive());
    }

    #[test]
    fn test_unsafe_rules_rejected() {
        let mut dict = Dictionary::new();
        let err = Rule::parse("?y a C :- ?x a B", &mut dict).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::UnsafeRule);
        assert!(Rule::parse("?x a C :- ?x a B , not ?y a D , not ?y a E", &mut dict).is_err());
        assert!(Rule::parse("?x a C :- ?x a B , not ?y a D", &mut dict).is_ok());
        assert!(Rule::parse("?x a C ?x a B", &mut dict).is_err());
    }

    #[test]
    fn test_indexing_pattern() {
        let atom = Atom::new(
            RuleTerm::Variable(0),
            RuleTerm::Constant(1),
            RuleTerm::Constant(9),
        );
        assert_eq!(atom.indexing_pattern(), 0b110);
        assert!(atom.matches(&[4, 1, 9], None));
        assert!(!atom.matches(&[4, 1, 8], None));

        let repeated = Atom::new(
            RuleTerm::Variable(0),
            RuleTerm::Constant(2),
            RuleTerm::Variable(0),
        );
        assert!(repeated.matches(&[5, 2, 5], None));
        assert!(!repeated.matches(&[5, 2, 6], None));
    }

    #[test]
    fn test_levels_and_recursion() {
        let mut dict = Dictionary::new();
        let rules = vec![
            parse("?x a B :- ?x a A", &mut dict, 1),
            parse("?x a C :- ?x a B", &mut dict, 2),
            parse("?x a C :- ?x a D", &mut dict, 2),
            parse("?x r ?z :- ?x r ?y , ?y r ?z", &mut dict, 1),
        ];
        let index = RuleIndex::build(rules, true).unwrap();

        assert!(!index.is_recursive(0));
        assert!(!index.is_recursive(1));
        assert!(index.is_recursive(3));
        assert!(index.is_supporting_body_atom(3, 1));
        assert_eq!(index.max_component_level(), 2);

        let c = dict.intern_str("C");
        let a = dict.intern_str("A");
        let one = dict.intern_str("1");
        assert_eq!(index.component_level(&[one, crate::term::RDF_TYPE_ID, c]), 2);
        assert_eq!(index.component_level(&[one, crate::term::RDF_TYPE_ID, a]), 0);

        assert!(index.has_rules(ComponentScope::InComponent(2)));
        assert!(!index.has_rules(ComponentScope::InComponent(0)));
        assert!(index.has_recursive_rules(ComponentScope::InComponent(1)));
        assert!(!index.has_recursive_rules(ComponentScope::InComponent(2)));
        assert_eq!(
            index
                .all_matching_head_atoms(&[one, crate::term::RDF_TYPE_ID, c], None)
                .len(),
            2
        );
    }

    #[test]
    fn test_invalid_stratification() {
        let mut dict = Dictionary::new();
        let rules = vec![
            parse("?x a B :- ?x a A", &mut dict, 1),
            parse("?x a C :- ?x a B", &mut dict, 0),
        ];
        let err = RuleIndex::build(rules, true).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidStratification);

        let rules = vec![
            parse("?x a B :- ?x a A", &mut dict, 1),
            parse("?x a B :- ?x a D", &mut dict, 2),
        ];
        assert!(RuleIndex::build(rules, true).is_err());

        let rules = vec![
            parse("?x a B :- ?x a A", &mut dict, 1),
            parse("?x a C :- ?x a A , not ?x a B", &mut dict, 1),
        ];
        assert!(RuleIndex::build(rules.clone(), true).is_err());
        assert!(RuleIndex::build(rules, false).is_ok());
    }

    #[test]
    fn test_without_levels_every_pivoted_rule_is_recursive() {
        let mut dict = Dictionary::new();
        let rules = vec![
            parse("?x a B :- ?x a A", &mut dict, 0),
            parse("c a B :- ", &mut dict, 0),
        ];
        let index = RuleIndex::build(rules, false).unwrap();
        assert!(index.is_recursive(0));
        assert!(!index.is_recursive(1));
        assert!(index.has_pivotless_rules(ComponentScope::AllComponents));
        assert!(index.has_nonrecursive_rules(ComponentScope::AllComponents));
    }

    #[test]
    fn test_rules_mentioning() {
        let mut dict = Dictionary::new();
        let rules = vec![
            parse("?x a B :- ?x a A", &mut dict, 0),
            parse("?x a C :- ?x p ?y", &mut dict, 0),
        ];
        let index = RuleIndex::build(rules, false).unwrap();
        let a = dict.intern_str("A");
        let e = dict.intern_str("E");
        assert_eq!(index.rules_mentioning(a, ComponentScope::AllComponents, None), vec![0]);

        let em = EqualityManager::new();
        em.merge(a, e);
        assert_eq!(
            index.rules_mentioning(e, ComponentScope::AllComponents, Some(&em)),
            vec![0]
        );
    }
}
