//! Text-format parameter rendering.
//!
//! Extended-query parameters travel as text; the server casts them using the
//! statement's parameter types. Binary encodings are out of scope, so a
//! parameter is simply an optional string, with `None` binding SQL NULL.

/// A single bind parameter, rendered to PostgreSQL text format.
pub trait ToParam {
    /// Text rendering of the value, or `None` for SQL NULL.
    fn to_param(&self) -> Option<String>;
}

impl ToParam for str {
    fn to_param(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl ToParam for String {
    fn to_param(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl ToParam for bool {
    fn to_param(&self) -> Option<String> {
        Some(if *self { "t" } else { "f" }.to_string())
    }
}

macro_rules! to_param_via_display {
    ($($ty:ty),*) => {
        $(
            impl ToParam for $ty {
                fn to_param(&self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )*
    };
}

to_param_via_display!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl<T: ToParam> ToParam for Option<T> {
    fn to_param(&self) -> Option<String> {
        self.as_ref().and_then(ToParam::to_param)
    }
}

impl<T: ToParam + ?Sized> ToParam for &T {
    fn to_param(&self) -> Option<String> {
        (*self).to_param()
    }
}

/// A full parameter list, typically a tuple.
pub trait Params {
    /// Render every parameter in order.
    fn into_values(self) -> Vec<Option<String>>;
}

impl Params for () {
    fn into_values(self) -> Vec<Option<String>> {
        Vec::new()
    }
}

impl Params for Vec<Option<String>> {
    fn into_values(self) -> Vec<Option<String>> {
        self
    }
}

macro_rules! params_for_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: ToParam),+> Params for ($($name,)+) {
            fn into_values(self) -> Vec<Option<String>> {
                vec![$(self.$idx.to_param()),+]
            }
        }
    };
}

params_for_tuple!(A: 0);
params_for_tuple!(A: 0, B: 1);
params_for_tuple!(A: 0, B: 1, C: 2);
params_for_tuple!(A: 0, B: 1, C: 2, D: 3);
params_for_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4);
params_for_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
params_for_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
params_for_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_rendering() {
        let values = (12345, "This is a test").into_values();
        assert_eq!(
            values,
            vec![Some("12345".to_string()), Some("This is a test".to_string())]
        );
    }

    #[test]
    fn test_null_and_bool() {
        let values = (None::<i32>, Some(7), true).into_values();
        assert_eq!(
            values,
            vec![None, Some("7".to_string()), Some("t".to_string())]
        );
    }
}
