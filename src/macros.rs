/// Generates a non-exhaustive enum mapping Rust variants to modem wire keywords.
///
/// Produces: enum definition + `as_str()` + `Display` + `AsRef<str>` + `FromStr`.
/// Matching is exact: modems emit result keywords in upper case and a
/// lower-case `ring` is not a result code. The error type must be defined
/// separately as a tuple struct around the rejected `String`.
///
/// # Example
///
/// ```ignore
/// define_wire_enum! {
///     error_type: ParseMyKeywordError,
///     /// Doc comment for the enum.
///     pub enum MyKeyword {
///         Foo => "FOO",
///         NoBar => "NO BAR",
///     }
/// }
/// ```
macro_rules! define_wire_enum {
    (
        error_type: $Err:ident,
        $(#[$enum_meta:meta])*
        $vis:vis enum $Name:ident {
            $(
                $(#[$var_meta:meta])*
                $variant:ident => $wire:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$enum_meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        #[allow(missing_docs)]
        $vis enum $Name {
            $(
                $(#[$var_meta])*
                $variant,
            )+
        }

        impl $Name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$Name] = &[$( $Name::$variant, )+];

            /// Wire keyword.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $Name::$variant => $wire, )+
                }
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl AsRef<str> for $Name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl std::str::FromStr for $Name {
            type Err = $Err;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s == $wire {
                        return Ok($Name::$variant);
                    }
                )+
                Err($Err(s.to_string()))
            }
        }
    };
}
