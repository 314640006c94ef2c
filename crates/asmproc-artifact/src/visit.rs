//! Typed traversal over every type reference in an artifact

use crate::artifact::Artifact;
use crate::attribute::CustomAttribute;
use crate::member::TypeDef;
use crate::types::TypeRef;

/// Mutating visitor over [`TypeRef`] nodes
pub trait VisitorMut {
    /// Called once per type reference
    fn visit_type_ref(&mut self, r: &mut TypeRef);
}

impl<F: FnMut(&mut TypeRef)> VisitorMut for F {
    fn visit_type_ref(&mut self, r: &mut TypeRef) {
        self(r);
    }
}

/// Visit every type reference in `artifact`
pub fn walk_artifact_mut<V: VisitorMut + ?Sized>(visitor: &mut V, artifact: &mut Artifact) {
    let mut f = |r: &mut TypeRef| visitor.visit_type_ref(r);
    walk_attributes(&mut f, &mut artifact.attributes);
    for ty in &mut artifact.types {
        walk_type(&mut f, ty);
    }
}

fn walk_attributes(f: &mut dyn FnMut(&mut TypeRef), attributes: &mut [CustomAttribute]) {
    for attr in attributes {
        attr.for_each_ref_mut(f);
    }
}

fn walk_type(f: &mut dyn FnMut(&mut TypeRef), ty: &mut TypeDef) {
    walk_attributes(f, &mut ty.attributes);
    if let Some(base) = &mut ty.base {
        base.for_each_ref_mut(f);
    }
    for iface in &mut ty.interfaces {
        iface.for_each_ref_mut(f);
    }
    for field in &mut ty.fields {
        field.ty.for_each_ref_mut(f);
        walk_attributes(f, &mut field.attributes);
    }
    for prop in &mut ty.properties {
        prop.ty.for_each_ref_mut(f);
        for param in &mut prop.params {
            param.for_each_ref_mut(f);
        }
        walk_attributes(f, &mut prop.attributes);
    }
    for method in &mut ty.methods {
        method.ret.for_each_ref_mut(f);
        for param in &mut method.params {
            param.ty.for_each_ref_mut(f);
        }
        walk_attributes(f, &mut method.attributes);
        if let Some(body) = &mut method.body {
            for local in &mut body.locals {
                local.for_each_ref_mut(f);
            }
            for ins in &mut body.instructions {
                ins.op.for_each_ref_mut(f);
            }
        }
    }
    for nested in &mut ty.nested {
        walk_type(f, nested);
    }
}

/// Rewrite references scoped to `from` so they point at `to`
/// (`None` meaning the artifact itself)
pub fn rescope(artifact: &mut Artifact, from: Option<&str>, to: Option<&str>) {
    let mut visitor = |r: &mut TypeRef| {
        if r.scope.as_deref() == from {
            r.scope = to.map(str::to_string);
        }
    };
    walk_artifact_mut(&mut visitor, artifact);
}
