use quote::ToTokens;
use std::collections::HashSet;
use syn::{Attribute, Field, FieldsNamed, Token, punctuated::Punctuated};

/// 合并 derive：先放入宏要求的派生，再追加用户已有的派生（去重），
/// 非 derive 属性保持原有顺序放在其后。
pub(crate) fn apply_derives(attrs: &mut Vec<Attribute>, required: Vec<syn::Path>) {
    let mut retained = Vec::new();
    let mut existing = Vec::new();
    for attr in attrs.drain(..) {
        if !attr.path().is_ident("derive") {
            retained.push(attr);
            continue;
        }
        match attr.parse_args_with(Punctuated::<syn::Path, Token![,]>::parse_terminated) {
            Ok(list) => existing.extend(list),
            Err(_) => retained.push(attr),
        }
    }

    let mut seen = HashSet::new();
    let merged: Vec<syn::Path> = required
        .into_iter()
        .chain(existing)
        .filter(|p| seen.insert(derive_key(p)))
        .collect();

    attrs.push(syn::parse_quote!(#[derive(#(#merged),*)]));
    attrs.extend(retained);
}

// 归一化 derive 的 key，避免 Serialize/serde::Serialize 重复
fn derive_key(p: &syn::Path) -> String {
    match p.segments.last() {
        Some(last) => match last.ident.to_string().as_str() {
            name @ ("Serialize" | "Deserialize") => format!("serde::{name}"),
            name => name.to_string(),
        },
        None => p.to_token_stream().to_string(),
    }
}

pub(crate) fn field_name_is(field: &Field, name: &str) -> bool {
    field.ident.as_ref().map(|i| i == name).unwrap_or(false)
}

pub(crate) fn has_field(fields: &FieldsNamed, name: &str) -> bool {
    fields.named.iter().any(|f| field_name_is(f, name))
}

/// 确保具名字段结构体包含给定字段
/// - leading：放在最前的字段（已存在则复用用户定义并移到最前）
/// - trailing：仅在缺失时追加到末尾
pub(crate) fn ensure_fields(fields: &mut FieldsNamed, leading: Vec<Field>, trailing: Vec<Field>) {
    let old = std::mem::take(&mut fields.named);
    let mut out: Punctuated<Field, Token![,]> = Punctuated::new();

    for required in leading.iter() {
        let name = required.ident.as_ref().map(|i| i.to_string()).unwrap_or_default();
        match old.iter().find(|f| field_name_is(f, &name)) {
            Some(existing) => out.push(existing.clone()),
            None => out.push(required.clone()),
        }
    }

    for f in old.iter() {
        let is_leading = leading.iter().any(|l| {
            l.ident
                .as_ref()
                .map(|i| field_name_is(f, &i.to_string()))
                .unwrap_or(false)
        });
        if !is_leading {
            out.push(f.clone());
        }
    }

    for required in trailing {
        let name = required.ident.as_ref().map(|i| i.to_string()).unwrap_or_default();
        if !old.iter().any(|f| field_name_is(f, &name)) {
            out.push(required);
        }
    }

    fields.named = out;
}

/// `OrderLine` -> `order_line`
pub(crate) fn to_snake_case(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 4);
    for (i, ch) in ident.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
