//! Derive macro for class/field-tagged records.
//!
//! `#[derive(Record)]` on a named-field struct generates the `Record` trait
//! plus matching `Encodable` and `Decodable` impls. The struct must also
//! implement `Default` (absent and skipped fields keep their defaults).
//!
//! Attributes:
//! - `#[tagwire(rename = "...")]` on the struct sets the wire class name,
//!   on a field sets the wire field name
//! - `#[tagwire(skip)]` on a field leaves it off the wire entirely

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Field, Fields, LitStr};

#[proc_macro_derive(Record, attributes(tagwire))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

struct WireField {
    ident: syn::Ident,
    name: String,
}

fn expand(input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let ident = &input.ident;

    let mut class_name = ident.to_string();
    for attr in &input.attrs {
        if attr.path().is_ident("tagwire") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename") {
                    let lit: LitStr = meta.value()?.parse()?;
                    class_name = lit.value();
                    Ok(())
                } else {
                    Err(meta.error("unsupported tagwire attribute"))
                }
            })?;
        }
    }

    let fields = match &input.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    ident,
                    "Record requires named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                ident,
                "Record can only be derived for structs",
            ))
        }
    };

    let mut wire_fields = Vec::new();
    for field in fields {
        if let Some(wf) = wire_field(field)? {
            wire_fields.push(wf);
        }
    }

    let names: Vec<&str> = wire_fields.iter().map(|f| f.name.as_str()).collect();
    let idents: Vec<&syn::Ident> = wire_fields.iter().map(|f| &f.ident).collect();
    let indices: Vec<usize> = (0..wire_fields.len()).collect();

    Ok(quote! {
        impl tagwire::Record for #ident {
            fn class_name() -> &'static str {
                #class_name
            }

            fn field_names() -> &'static [&'static str] {
                &[#(#names),*]
            }

            fn encode_field(&self, index: usize, w: &mut tagwire::Writer) -> tagwire::Result<()> {
                match index {
                    #( #indices => tagwire::Encodable::encode(&self.#idents, w), )*
                    _ => Ok(()),
                }
            }

            fn decode_field(&mut self, index: usize, r: &mut tagwire::Reader) -> tagwire::Result<()> {
                match index {
                    #( #indices => {
                        self.#idents = tagwire::Decodable::decode(r)?;
                        Ok(())
                    } )*
                    _ => Ok(()),
                }
            }
        }

        impl tagwire::Encodable for #ident {
            fn encode(&self, w: &mut tagwire::Writer) -> tagwire::Result<()> {
                w.write_record(self)
            }
        }

        impl tagwire::Decodable for #ident {
            fn decode(r: &mut tagwire::Reader) -> tagwire::Result<Self> {
                r.read_record()
            }
        }
    })
}

fn wire_field(field: &Field) -> syn::Result<Option<WireField>> {
    let ident = field
        .ident
        .clone()
        .ok_or_else(|| syn::Error::new_spanned(field, "Record requires named fields"))?;
    let mut name = ident.to_string();
    let mut skip = false;
    for attr in &field.attrs {
        if attr.path().is_ident("tagwire") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    skip = true;
                    Ok(())
                } else if meta.path.is_ident("rename") {
                    let lit: LitStr = meta.value()?.parse()?;
                    name = lit.value();
                    Ok(())
                } else {
                    Err(meta.error("unsupported tagwire attribute"))
                }
            })?;
        }
    }
    Ok(if skip {
        None
    } else {
        Some(WireField { ident, name })
    })
}
