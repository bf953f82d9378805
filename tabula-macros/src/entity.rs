use crate::utils::{apply_derives, ensure_fields, field_name_is, to_snake_case};
use proc_macro::TokenStream;
use quote::quote;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Field, Item, Meta, Result, Token, parse::Parse, parse::ParseStream, parse_macro_input};

/// #[entity] 宏实现
/// - 追加字段 `id: i64`（置于最前），并按能力追加 `audit` / `is_deleted` / `domain_events`
/// - 实现 `::tabula_domain::entity::Entity` 及所声明能力对应的 trait
/// - 参数：`table = "..."`（默认结构体名的 snake_case）、`audit`、`soft_delete`、
///   `version_tracking`（隐含 `events`）、`events`、`debug = true|false`
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as EntityAttrConfig);
    let input = parse_macro_input!(item as Item);

    let mut st = match input {
        Item::Struct(s) => s,
        other => {
            return syn::Error::new(other.span(), "#[entity] only on struct")
                .to_compile_error()
                .into();
        }
    };

    let fields_named = match &mut st.fields {
        syn::Fields::Named(f) => f,
        _ => {
            return syn::Error::new(st.span(), "only supports named-field struct")
                .to_compile_error()
                .into();
        }
    };

    let events = cfg.events || cfg.version_tracking;

    // 已存在的 id 字段必须为 i64，其余能力字段若已声明则沿用用户定义
    if let Some(existing) = fields_named
        .named
        .iter()
        .find(|f| field_name_is(f, "id"))
    {
        let is_i64 = matches!(&existing.ty, syn::Type::Path(p) if p.path.is_ident("i64"));
        if !is_i64 {
            return syn::Error::new(existing.ty.span(), "entity field `id` must be `i64`")
                .to_compile_error()
                .into();
        }
    }

    let leading: Vec<Field> = vec![syn::parse_quote! {
        #[serde(default)]
        pub id: i64
    }];
    let mut trailing: Vec<Field> = Vec::new();
    if cfg.audit {
        trailing.push(syn::parse_quote! {
            #[serde(flatten)]
            pub audit: ::tabula_domain::audit::AuditInfo
        });
    }
    if cfg.soft_delete {
        trailing.push(syn::parse_quote! {
            #[serde(default)]
            pub is_deleted: bool
        });
    }
    if events {
        trailing.push(syn::parse_quote! {
            #[serde(skip)]
            pub domain_events: ::tabula_domain::domain_event::DomainEvents
        });
    }
    ensure_fields(fields_named, leading, trailing);

    let mut required: Vec<syn::Path> = vec![
        syn::parse_quote!(Clone),
        syn::parse_quote!(Default),
        syn::parse_quote!(serde::Serialize),
        syn::parse_quote!(serde::Deserialize),
    ];
    if cfg.derive_debug {
        required.insert(0, syn::parse_quote!(Debug));
    }
    apply_derives(&mut st.attrs, required);

    let ident = &st.ident;
    let table = cfg
        .table
        .unwrap_or_else(|| syn::LitStr::new(&to_snake_case(&ident.to_string()), ident.span()));
    let generics = st.generics.clone();
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let audit_flag = cfg.audit;
    let soft_delete_flag = cfg.soft_delete;
    let version_flag = cfg.version_tracking;

    let mut accessors = proc_macro2::TokenStream::new();
    let mut capability_impls = proc_macro2::TokenStream::new();

    if cfg.audit {
        accessors.extend(quote! {
            fn as_auditable(&self) -> ::core::option::Option<&dyn ::tabula_domain::entity::Auditable> {
                ::core::option::Option::Some(self)
            }
            fn as_auditable_mut(&mut self) -> ::core::option::Option<&mut dyn ::tabula_domain::entity::Auditable> {
                ::core::option::Option::Some(self)
            }
        });
        capability_impls.extend(quote! {
            impl #impl_generics ::tabula_domain::entity::Auditable for #ident #ty_generics #where_clause {
                fn audit_info(&self) -> &::tabula_domain::audit::AuditInfo { &self.audit }
                fn audit_info_mut(&mut self) -> &mut ::tabula_domain::audit::AuditInfo { &mut self.audit }
            }
        });
    }

    if cfg.soft_delete {
        accessors.extend(quote! {
            fn as_soft_delete(&self) -> ::core::option::Option<&dyn ::tabula_domain::entity::SoftDelete> {
                ::core::option::Option::Some(self)
            }
            fn as_soft_delete_mut(&mut self) -> ::core::option::Option<&mut dyn ::tabula_domain::entity::SoftDelete> {
                ::core::option::Option::Some(self)
            }
        });
        capability_impls.extend(quote! {
            impl #impl_generics ::tabula_domain::entity::SoftDelete for #ident #ty_generics #where_clause {
                fn is_deleted(&self) -> bool { self.is_deleted }
                fn set_deleted(&mut self, deleted: bool) { self.is_deleted = deleted; }
            }
        });
    }

    if events {
        accessors.extend(quote! {
            fn as_event_source(&self) -> ::core::option::Option<&dyn ::tabula_domain::entity::HasDomainEvents> {
                ::core::option::Option::Some(self)
            }
            fn as_event_source_mut(&mut self) -> ::core::option::Option<&mut dyn ::tabula_domain::entity::HasDomainEvents> {
                ::core::option::Option::Some(self)
            }
        });
        capability_impls.extend(quote! {
            impl #impl_generics ::tabula_domain::entity::HasDomainEvents for #ident #ty_generics #where_clause {
                fn domain_events(&self) -> &::tabula_domain::domain_event::DomainEvents { &self.domain_events }
                fn domain_events_mut(&mut self) -> &mut ::tabula_domain::domain_event::DomainEvents { &mut self.domain_events }
            }
        });
    }

    let expanded = quote! {
        #st

        impl #impl_generics ::tabula_domain::entity::Entity for #ident #ty_generics #where_clause {
            const TYPE: &'static str = #table;
            const CAPABILITIES: ::tabula_domain::entity::Capabilities =
                ::tabula_domain::entity::Capabilities::new(#audit_flag, #soft_delete_flag, #version_flag, #events);

            fn id(&self) -> i64 { self.id }

            fn set_id(&mut self, id: i64) { self.id = id; }

            #accessors
        }

        #capability_impls
    };

    TokenStream::from(expanded)
}

// -------- parsing --------

struct EntityAttrConfig {
    table: Option<syn::LitStr>,
    audit: bool,
    soft_delete: bool,
    version_tracking: bool,
    events: bool,
    derive_debug: bool,
}

impl Parse for EntityAttrConfig {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut cfg = Self {
            table: None,
            audit: false,
            soft_delete: false,
            version_tracking: false,
            events: false,
            derive_debug: true,
        };
        if input.is_empty() {
            return Ok(cfg);
        }

        let metas = Punctuated::<Meta, Token![,]>::parse_terminated(input)?;
        let mut seen: Vec<String> = Vec::new();

        for meta in metas {
            let key = meta
                .path()
                .get_ident()
                .map(|i| i.to_string())
                .ok_or_else(|| syn::Error::new(meta.span(), "invalid attribute key"))?;
            if seen.contains(&key) {
                return Err(syn::Error::new(
                    meta.span(),
                    format!("duplicate key '{key}' in attribute"),
                ));
            }
            seen.push(key.clone());

            match (key.as_str(), &meta) {
                ("table", Meta::NameValue(nv)) => match &nv.value {
                    syn::Expr::Lit(syn::ExprLit {
                        lit: syn::Lit::Str(lit),
                        ..
                    }) => cfg.table = Some(lit.clone()),
                    other => {
                        return Err(syn::Error::new(
                            other.span(),
                            "expected string literal for 'table'",
                        ));
                    }
                },
                ("debug", Meta::NameValue(nv)) => match &nv.value {
                    syn::Expr::Lit(syn::ExprLit {
                        lit: syn::Lit::Bool(b),
                        ..
                    }) => cfg.derive_debug = b.value(),
                    other => {
                        return Err(syn::Error::new(
                            other.span(),
                            "expected boolean literal for 'debug'",
                        ));
                    }
                },
                ("audit", Meta::Path(_)) => cfg.audit = true,
                ("soft_delete", Meta::Path(_)) => cfg.soft_delete = true,
                ("version_tracking", Meta::Path(_)) => cfg.version_tracking = true,
                ("events", Meta::Path(_)) => cfg.events = true,
                _ => {
                    return Err(syn::Error::new(
                        meta.span(),
                        "unknown key; expected 'table' | 'audit' | 'soft_delete' | 'version_tracking' | 'events' | 'debug'",
                    ));
                }
            }
        }

        Ok(cfg)
    }
}
