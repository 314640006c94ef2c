//! Semantic checks over a compiled artifact
//!
//! Every type, field and method the compiled code touches must exist in the
//! compiled artifact itself, in the live artifact, or in an artifact the
//! resolver can provide, and must be accessible from the compiled artifact's
//! name. Internal members of another artifact need an internals-visible-to
//! grant; family members need the using type to derive from the declaring
//! type.

use crate::error::Diagnostic;
use asmproc_artifact::{Artifact, AttrValue, CustomAttribute, FieldRef, MethodRef, Op, TypeDef, TypeRef, TypeSig, Visibility};
use asmproc_resolver::ArtifactScope;
use std::collections::BTreeSet;

/// Base chains longer than this are treated as cyclic
const MAX_BASE_DEPTH: usize = 64;

/// What a member lookup found
#[derive(Debug, Clone, Copy)]
struct MemberInfo {
    visibility: Visibility,
    is_static: bool,
    accessible: bool,
}

/// Collects diagnostics for one compiled artifact
pub(crate) struct Checker<'a> {
    compiled: &'a Artifact,
    scope: ArtifactScope<'a>,
    diagnostics: Vec<Diagnostic>,
    /// Artifacts other than the compiled one that the code uses
    used_scopes: BTreeSet<String>,
    location: String,
    current: TypeRef,
}

impl<'a> Checker<'a> {
    pub(crate) fn new(compiled: &'a Artifact, scope: ArtifactScope<'a>) -> Self {
        Self {
            compiled,
            scope,
            diagnostics: Vec::new(),
            used_scopes: BTreeSet::new(),
            location: String::new(),
            current: TypeRef::local(""),
        }
    }

    /// Check everything; returns diagnostics and the artifacts used
    pub(crate) fn run(mut self) -> (Vec<Diagnostic>, BTreeSet<String>) {
        let mut seen = BTreeSet::new();
        let compiled = self.compiled;
        self.location = compiled.name.clone();
        for attr in &compiled.attributes {
            self.check_attribute(attr);
        }
        for (name, def) in compiled.walk_types() {
            if !seen.insert(name.clone()) {
                self.location.clone_from(&name);
                self.report(format!("type '{name}' defined more than once"));
                continue;
            }
            self.check_type(&name, def);
        }
        (self.diagnostics, self.used_scopes)
    }

    fn report(&mut self, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            source: None,
            location: self.location.clone(),
            message: message.into(),
        });
    }

    fn check_type(&mut self, name: &str, def: &TypeDef) {
        self.location = name.to_string();
        self.current = TypeRef::local(name);
        if let Some(base) = &def.base {
            self.check_sig(base);
        }
        for interface in &def.interfaces {
            self.check_sig(interface);
        }
        for attr in &def.attributes {
            self.check_attribute(attr);
        }
        for field in &def.fields {
            self.location = format!("{name}::{}", field.name);
            self.check_sig(&field.ty);
            for attr in &field.attributes {
                self.check_attribute(attr);
            }
        }
        for method in &def.methods {
            self.location = format!("{name}::{}", method.name);
            self.check_sig(&method.ret);
            for param in &method.params {
                self.check_sig(&param.ty);
            }
            for attr in &method.attributes {
                self.check_attribute(attr);
            }
            if method.is_abstract {
                if method.body.is_some() {
                    self.report("abstract method has a body");
                }
                continue;
            }
            let Some(body) = &method.body else {
                self.report("method has no body");
                continue;
            };
            for local in &body.locals {
                self.check_sig(local);
            }
            for ins in &body.instructions {
                self.check_op(&ins.op);
            }
        }
    }

    fn check_attribute(&mut self, attr: &CustomAttribute) {
        self.check_type_ref(attr.ty());
        for value in attr.args.iter().chain(attr.named.iter().map(|(_, v)| v)) {
            if let AttrValue::Type(sig) = value {
                self.check_sig(sig);
            }
        }
    }

    fn check_op(&mut self, op: &Op) {
        match op {
            Op::Ldfld(field) | Op::Stfld(field) => self.check_field(field, false),
            Op::Ldsfld(field) | Op::Stsfld(field) => self.check_field(field, true),
            Op::Newobj(method) if !method.is_ctor() => {
                self.report(format!("newobj target '{method}' is not a constructor"));
            }
            Op::Call(method) | Op::Callvirt(method) | Op::Newobj(method) | Op::Ldftn(method) => {
                self.check_method(method);
            }
            Op::Ldtoken(sig) | Op::Castclass(sig) => self.check_sig(sig),
            _ => {}
        }
    }

    fn check_sig(&mut self, sig: &TypeSig) {
        let mut refs = Vec::new();
        sig.for_each_ref(&mut |r| refs.push(r.clone()));
        for r in refs {
            self.check_type_ref(&r);
        }
    }

    /// `r` with an explicit scope; compiled-local types get the compiled name
    fn anchor(&self, r: &TypeRef) -> TypeRef {
        r.anchored(&self.compiled.name)
    }

    fn with_def<R>(&self, r: &TypeRef, f: impl FnOnce(&Artifact, &TypeDef) -> R) -> Option<R> {
        match r.scope.as_deref() {
            None => self.compiled.find_type(&r.full_name).map(|def| f(self.compiled, def)),
            Some(name) if name == self.compiled.name => {
                self.compiled.find_type(&r.full_name).map(|def| f(self.compiled, def))
            }
            Some(_) => self.scope.with_type(r, f),
        }
    }

    /// Base types of `r`, nearest first, each anchored to its defining artifact
    fn base_chain(&self, r: &TypeRef) -> Vec<TypeRef> {
        let mut chain = Vec::new();
        let mut current = self.anchor(r);
        while chain.len() < MAX_BASE_DEPTH {
            let next = self
                .with_def(&current, |owner, def| {
                    def.base
                        .as_ref()
                        .and_then(TypeSig::type_ref)
                        .map(|b| b.anchored(&owner.name))
                })
                .flatten();
            match next {
                Some(base) => {
                    chain.push(base.clone());
                    current = base;
                }
                None => break,
            }
        }
        chain
    }

    fn current_derives_from(&self, declaring: &TypeRef) -> bool {
        let target = self.anchor(declaring);
        let current = self.anchor(&self.current);
        current == target || self.base_chain(&current).contains(&target)
    }

    fn check_type_ref(&mut self, r: &TypeRef) {
        if let Some(scope) = &r.scope {
            if scope != &self.compiled.name {
                self.used_scopes.insert(scope.clone());
            }
        }
        let from = self.compiled.name.clone();
        let found = self.with_def(r, |owner, _| {
            let mut path = String::new();
            let mut accessible = true;
            for (depth, segment) in r.full_name.split('/').enumerate() {
                if depth > 0 {
                    path.push('/');
                }
                path.push_str(segment);
                let visibility = owner.find_type(&path).map_or(Visibility::Private, |t| t.visibility);
                // top-level types are either public or internal
                let visibility = match (depth, visibility) {
                    (0, Visibility::Public) => Visibility::Public,
                    (0, _) => Visibility::Assembly,
                    (_, v) => v,
                };
                accessible &= self.scope.is_accessible_from(owner, visibility, &from);
            }
            accessible
        });
        match found {
            None => self.report(format!("unknown type '{r}'")),
            Some(false) => self.report(format!("type '{r}' is not accessible from '{from}'")),
            Some(true) => {}
        }
    }

    /// Find a member on `declaring`, then on its bases when `inherited`
    fn lookup_member(
        &self,
        declaring: &TypeRef,
        inherited: bool,
        pick: &dyn Fn(&TypeDef) -> Option<(Visibility, bool)>,
    ) -> Option<MemberInfo> {
        let from = &self.compiled.name;
        let start = self.anchor(declaring);
        let bases = if inherited { self.base_chain(&start) } else { Vec::new() };
        std::iter::once(start)
            .chain(bases)
            .find_map(|r| {
                self.with_def(&r, |owner, def| {
                    pick(def).map(|(visibility, is_static)| MemberInfo {
                        visibility,
                        is_static,
                        accessible: self.scope.is_accessible_from(owner, visibility, from),
                    })
                })
                .flatten()
            })
    }

    fn member_accessible(&self, info: MemberInfo, declaring: &TypeRef) -> bool {
        info.accessible
            || (matches!(info.visibility, Visibility::Family | Visibility::FamilyOrAssembly)
                && self.current_derives_from(declaring))
    }

    fn check_field(&mut self, field: &FieldRef, expect_static: bool) {
        self.check_sig(&field.declaring);
        self.check_sig(&field.ty);
        let Some(declaring) = field.declaring.type_ref().cloned() else {
            self.report(format!("field '{field}' has no declaring type"));
            return;
        };
        let name = field.name.clone();
        let found = self.lookup_member(&declaring, true, &|def| {
            def.field(&name).map(|f| (f.visibility, f.is_static))
        });
        match found {
            None if self.with_def(&declaring, |_, _| ()).is_some() => {
                self.report(format!("unknown field '{field}'"));
            }
            None => {}
            Some(info) if info.is_static != expect_static => {
                let problem = if expect_static { "is not static" } else { "is static" };
                self.report(format!("field '{field}' {problem}"));
            }
            Some(info) if !self.member_accessible(info, &declaring) => {
                self.report(format!("field '{field}' is not accessible"));
            }
            Some(_) => {}
        }
    }

    fn check_method(&mut self, method: &MethodRef) {
        self.check_sig(&method.declaring);
        self.check_sig(&method.ret);
        for sig in method.params.iter().chain(&method.generic_args) {
            self.check_sig(sig);
        }
        let Some(declaring) = method.declaring.type_ref().cloned() else {
            self.report(format!("method '{method}' has no declaring type"));
            return;
        };
        // constructors are never inherited
        let found = self.lookup_member(&declaring, !method.is_ctor(), &|def| {
            def.methods
                .iter()
                .find(|m| {
                    m.name == method.name
                        && m.params.len() == method.params.len()
                        && m.is_static != method.has_this
                        && m.generic_params.len() == method.generic_args.len()
                })
                .map(|m| (m.visibility, m.is_static))
        });
        match found {
            None if self.with_def(&declaring, |_, _| ()).is_some() => {
                self.report(format!("unknown method '{method}'"));
            }
            None => {}
            Some(info) if !self.member_accessible(info, &declaring) => {
                self.report(format!("method '{method}' is not accessible"));
            }
            Some(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asmproc_artifact::known::system;
    use asmproc_artifact::{AttrValue, FieldDef, MethodBody, MethodDef, Primitive, Version};
    use asmproc_resolver::Resolver;
    use asmproc_test_utils::{
        attribute, class, class_with_base, corlib, corlib_type, data_member, engine_core, game, method, prim,
    };
    use std::sync::Arc;

    fn resolver() -> Resolver {
        let resolver = Resolver::new();
        resolver.register(Arc::new(corlib()));
        resolver.register(Arc::new(engine_core()));
        resolver
    }

    fn compiled_with(ops: Vec<Op>) -> Artifact {
        let mut art = Artifact::new("Game.Serializers", Version::default());
        let mut ty = class("Game.Generated.Touch");
        ty.methods.push(
            MethodDef::new("Run", Visibility::Public, Vec::new(), TypeSig::VOID)
                .into_static()
                .with_body(MethodBody::from_ops(ops)),
        );
        art.types.push(ty);
        art
    }

    fn live() -> Artifact {
        let mut art = game();
        let mut player = class("Game.Player");
        player.fields.push(FieldDef::new("Health", prim(Primitive::I32), Visibility::Public));
        player
            .fields
            .push(data_member("secret", prim(Primitive::I32), Visibility::Assembly));
        art.types.push(player);
        art
    }

    fn check(compiled: &Artifact, live: &Artifact, resolver: &Resolver) -> Vec<String> {
        let (diagnostics, _) = Checker::new(compiled, ArtifactScope::new(live, resolver)).run();
        diagnostics.iter().map(ToString::to_string).collect()
    }

    fn load_field(name: &str) -> Op {
        Op::Ldfld(FieldRef::new(
            TypeSig::external("Game", "Game.Player"),
            name,
            prim(Primitive::I32),
        ))
    }

    #[test]
    fn resolvable_code_has_no_diagnostics() {
        let resolver = resolver();
        let live = live();
        let compiled = compiled_with(vec![Op::Ldnull, load_field("Health"), Op::Pop, Op::Ret]);
        let (diagnostics, used) = Checker::new(&compiled, ArtifactScope::new(&live, &resolver)).run();
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        assert!(used.contains("Game"));
        assert!(used.contains("System.Runtime"));
    }

    #[test]
    fn unknown_types_and_members_reported() {
        let resolver = resolver();
        let live = live();
        let call = MethodRef::new_static(TypeSig::external("Game", "Game.Player"), "Missing", vec![], TypeSig::VOID);
        let compiled = compiled_with(vec![
            Op::Ldtoken(TypeSig::external("Game", "Game.Ghost")),
            Op::Ldnull,
            load_field("Mana"),
            Op::Call(call),
            Op::Ret,
        ]);
        let diagnostics = check(&compiled, &live, &resolver);
        assert_eq!(diagnostics.len(), 3, "{diagnostics:?}");
        assert!(diagnostics[0].contains("unknown type '[Game]Game.Ghost'"));
        assert!(diagnostics[1].contains("unknown field"));
        assert!(diagnostics[2].contains("unknown method"));
        assert!(diagnostics[0].starts_with("Game.Generated.Touch::Run"));
    }

    #[test]
    fn internal_members_need_grant() {
        let resolver = resolver();
        let mut live = live();
        let compiled = compiled_with(vec![Op::Ldnull, load_field("secret"), Op::Pop, Op::Ret]);
        let diagnostics = check(&compiled, &live, &resolver);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].contains("not accessible"));

        let mut grant = attribute(asmproc_artifact::KnownAttribute::InternalsVisibleTo);
        grant.args.push(AttrValue::Str("Game.Serializers".into()));
        live.attributes.push(grant);
        assert!(check(&compiled, &live, &resolver).is_empty());
    }

    #[test]
    fn internal_and_nested_private_types_rejected() {
        let resolver = resolver();
        let mut live = live();
        let mut hidden = class("Game.Hidden");
        hidden.visibility = Visibility::Assembly;
        let mut outer = class("Game.Outer");
        outer
            .nested
            .push(asmproc_artifact::TypeDef::new("", "Secret", Visibility::Private));
        live.types.push(hidden);
        live.types.push(outer);

        let compiled = compiled_with(vec![
            Op::Ldtoken(TypeSig::external("Game", "Game.Hidden")),
            Op::Pop,
            Op::Ldtoken(TypeSig::external("Game", "Game.Outer/Secret")),
            Op::Pop,
            Op::Ldtoken(TypeSig::external("Game", "Game.Outer")),
            Op::Pop,
            Op::Ret,
        ]);
        let diagnostics = check(&compiled, &live, &resolver);
        assert_eq!(diagnostics.len(), 2, "{diagnostics:?}");
    }

    #[test]
    fn static_mismatch_and_bad_newobj_reported() {
        let resolver = resolver();
        let live = live();
        let compiled = compiled_with(vec![
            Op::Ldsfld(FieldRef::new(
                TypeSig::external("Game", "Game.Player"),
                "Health",
                prim(Primitive::I32),
            )),
            Op::Pop,
            Op::Newobj(MethodRef::new_instance(
                corlib_type(system::OBJECT),
                "ToString",
                vec![],
                prim(Primitive::String),
            )),
            Op::Ret,
        ]);
        let diagnostics = check(&compiled, &live, &resolver);
        assert_eq!(diagnostics.len(), 2, "{diagnostics:?}");
        assert!(diagnostics[0].contains("is not static"));
        assert!(diagnostics[1].contains("not a constructor"));
    }

    #[test]
    fn inherited_methods_found_on_bases_but_not_ctors() {
        let resolver = resolver();
        let mut live = game();
        let mut actor = class("Game.Actor");
        actor.methods.push(method("Tick", vec![], TypeSig::VOID));
        live.types.push(actor);
        live.types
            .push(class_with_base("Game.Player", TypeSig::local("Game.Actor")));

        let player = TypeSig::external("Game", "Game.Player");
        let compiled = compiled_with(vec![
            Op::Ldnull,
            Op::Callvirt(MethodRef::new_instance(player.clone(), "Tick", vec![], TypeSig::VOID)),
            Op::Ldnull,
            Op::Call(MethodRef::ctor(player, vec![])),
            Op::Ret,
        ]);
        let diagnostics = check(&compiled, &live, &resolver);
        assert_eq!(diagnostics.len(), 1, "{diagnostics:?}");
        assert!(diagnostics[0].contains("unknown method 'instance void [Game]Game.Player::.ctor()'"));
    }

    #[test]
    fn duplicate_types_and_missing_bodies_reported() {
        let resolver = resolver();
        let live = live();
        let mut compiled = compiled_with(vec![Op::Ret]);
        compiled.types.push(class("Game.Generated.Touch"));
        let mut other = class("Game.Generated.Other");
        other
            .methods
            .push(MethodDef::new("Empty", Visibility::Public, Vec::new(), TypeSig::VOID));
        compiled.types.push(other);
        let diagnostics = check(&compiled, &live, &resolver);
        assert_eq!(diagnostics.len(), 2, "{diagnostics:?}");
        assert!(diagnostics[0].contains("defined more than once"));
        assert_eq!(diagnostics[1], "Game.Generated.Other::Empty: method has no body");
    }
}
