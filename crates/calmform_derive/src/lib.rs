use proc_macro::TokenStream;
use proc_macro2::{Ident, Span, TokenStream as TokenStream2};
use proc_macro_crate::{FoundCrate, crate_name};
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Field, Fields, LitStr, parse_macro_input};

/// Derives `FormModel` for a struct with named fields, plus one
/// `{Model}{Field}Lens` per field and a `{Model}Fields` accessor struct.
///
/// Lens keys follow the serialized field names, so `#[serde(rename = "..")]`
/// is honored and `#[serde(skip)]` fields get no lens. The struct must also
/// implement `Clone`, `Serialize` and `Deserialize`.
#[proc_macro_derive(FormModel)]
pub fn derive_form_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(input) {
        Ok(tokens) => tokens.into(),
        Err(error) => error.to_compile_error().into(),
    }
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            input.ident,
            "FormModel derive currently supports only non-generic structs",
        ));
    }

    let model_ident = input.ident;
    let fields_struct_ident = format_ident!("{model_ident}Fields");

    let named_fields = match input.data {
        Data::Struct(data) => match data.fields {
            Fields::Named(fields) => fields.named,
            _ => {
                return Err(syn::Error::new(
                    Span::call_site(),
                    "FormModel derive requires a struct with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new(
                Span::call_site(),
                "FormModel derive is only supported on structs",
            ));
        }
    };

    let calmform = calmform_path();
    let mut lens_defs = Vec::new();
    let mut fields_methods = Vec::new();

    for field in named_fields {
        let serde = SerdeField::parse(&field)?;
        if serde.skip {
            continue;
        }
        let Some(field_ident) = field.ident else {
            continue;
        };
        let field_ty = field.ty;
        let key = serde
            .rename
            .unwrap_or_else(|| field_ident.to_string().trim_start_matches("r#").to_owned());
        let lens_ident = format_ident!(
            "{model_ident}{}Lens",
            to_pascal_case(field_ident.to_string().trim_start_matches("r#"))
        );

        lens_defs.push(quote! {
            #[derive(Clone, Copy, Debug, Default)]
            pub struct #lens_ident;

            impl #calmform::form::FieldLens<#model_ident> for #lens_ident {
                type Value = #field_ty;

                fn key(self) -> #calmform::form::FieldKey {
                    #calmform::form::FieldKey::new(#key)
                }

                fn get<'a>(self, model: &'a #model_ident) -> &'a Self::Value {
                    &model.#field_ident
                }

                fn set(self, model: &mut #model_ident, value: Self::Value) {
                    model.#field_ident = value;
                }
            }
        });

        fields_methods.push(quote! {
            pub const fn #field_ident(&self) -> #lens_ident {
                #lens_ident
            }
        });
    }

    Ok(quote! {
        #[derive(Clone, Copy, Debug, Default)]
        pub struct #fields_struct_ident;

        impl #fields_struct_ident {
            #(#fields_methods)*
        }

        impl #calmform::form::FormModel for #model_ident {
            type Fields = #fields_struct_ident;

            fn fields() -> Self::Fields {
                #fields_struct_ident
            }
        }

        #(#lens_defs)*
    })
}

/// The subset of field-level serde attributes that changes a field's key.
#[derive(Default)]
struct SerdeField {
    rename: Option<String>,
    skip: bool,
}

impl SerdeField {
    fn parse(field: &Field) -> syn::Result<Self> {
        let mut parsed = Self::default();
        for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("serde")) {
            attr.parse_nested_meta(|meta| {
                // `rename(serialize = "..")` and friends are not key-relevant.
                if meta.input.peek(syn::token::Paren) {
                    return meta.parse_nested_meta(|inner| {
                        if inner.input.peek(syn::Token![=]) {
                            let _: syn::Expr = inner.value()?.parse()?;
                        }
                        Ok(())
                    });
                }
                if meta.path.is_ident("rename") {
                    let value: LitStr = meta.value()?.parse()?;
                    parsed.rename = Some(value.value());
                } else if meta.path.is_ident("skip") {
                    parsed.skip = true;
                } else if meta.input.peek(syn::Token![=]) {
                    let _: syn::Expr = meta.value()?.parse()?;
                }
                Ok(())
            })?;
        }
        Ok(parsed)
    }
}

fn calmform_path() -> TokenStream2 {
    match crate_name("calmform") {
        Ok(FoundCrate::Name(name)) => {
            let ident = Ident::new(&name, Span::call_site());
            quote!(::#ident)
        }
        Ok(FoundCrate::Itself) => quote!(crate),
        Err(_) => quote!(::calmform),
    }
}

fn to_pascal_case(input: &str) -> String {
    let mut out = String::new();
    for segment in input.split('_') {
        if segment.is_empty() {
            continue;
        }
        let mut chars = segment.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}
