use crate::utils::{apply_derives, ensure_fields, has_field};
use proc_macro::TokenStream;
use quote::quote;
use syn::spanned::Spanned;
use syn::{Item, Meta, Result, Token, parse::Parse, parse::ParseStream, parse_macro_input};

/// #[domain_event] 宏实现
/// - 仅支持具名字段结构体
/// - 在最前追加 `meta: ::tabula_domain::domain_event::EventMeta`（若缺失）
/// - 派生 Debug、Clone，生成 `EVENT_TYPE` 常量与 `DomainEvent` 实现
/// - 参数：`name = "..."`，默认使用结构体名
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as EventAttrConfig);
    let input = parse_macro_input!(item as Item);

    let mut st = match input {
        Item::Struct(s) => s,
        other => {
            return syn::Error::new(
                other.span(),
                "#[domain_event] can only be used on struct types",
            )
            .to_compile_error()
            .into();
        }
    };

    let fields_named = match &mut st.fields {
        syn::Fields::Named(f) => f,
        _ => {
            return syn::Error::new(st.span(), "#[domain_event] supports only named-field struct")
                .to_compile_error()
                .into();
        }
    };

    if !has_field(fields_named, "meta") {
        ensure_fields(
            fields_named,
            vec![syn::parse_quote! { pub meta: ::tabula_domain::domain_event::EventMeta }],
            Vec::new(),
        );
    }

    apply_derives(
        &mut st.attrs,
        vec![syn::parse_quote!(Debug), syn::parse_quote!(Clone)],
    );

    let ident = &st.ident;
    let name = cfg
        .name
        .unwrap_or_else(|| syn::LitStr::new(&ident.to_string(), ident.span()));
    let generics = st.generics.clone();
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let out = quote! {
        #st

        impl #impl_generics #ident #ty_generics #where_clause {
            pub const EVENT_TYPE: &'static str = #name;
        }

        impl #impl_generics ::tabula_domain::domain_event::DomainEvent for #ident #ty_generics #where_clause {
            fn event_id(&self) -> i64 {
                self.meta.event_id()
            }

            fn event_type(&self) -> &str {
                Self::EVENT_TYPE
            }

            fn occurred_at(&self) -> ::tabula_domain::chrono::DateTime<::tabula_domain::chrono::Utc> {
                self.meta.occurred_at()
            }

            fn as_any(&self) -> &dyn ::core::any::Any {
                self
            }
        }
    };

    TokenStream::from(out)
}

// 解析 domain_event 宏参数：name = "<str>"
struct EventAttrConfig {
    name: Option<syn::LitStr>,
}

impl Parse for EventAttrConfig {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut name: Option<syn::LitStr> = None;
        if input.is_empty() {
            return Ok(Self { name });
        }

        let metas = syn::punctuated::Punctuated::<Meta, Token![,]>::parse_terminated(input)?;
        for meta in metas {
            match &meta {
                Meta::NameValue(nv) if nv.path.is_ident("name") => {
                    if name.is_some() {
                        return Err(syn::Error::new(
                            nv.path.span(),
                            "duplicate key 'name' in attribute",
                        ));
                    }
                    match &nv.value {
                        syn::Expr::Lit(syn::ExprLit {
                            lit: syn::Lit::Str(lit),
                            ..
                        }) => name = Some(lit.clone()),
                        other => {
                            return Err(syn::Error::new(
                                other.span(),
                                "expected string literal for 'name'",
                            ));
                        }
                    }
                }
                other => {
                    return Err(syn::Error::new(other.span(), "unknown key; expected 'name'"));
                }
            }
        }

        Ok(Self { name })
    }
}
