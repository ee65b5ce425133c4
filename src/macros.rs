pub use enclose::*;

/// The current source location, including the enclosing module path.
#[macro_export]
macro_rules! site {
	() => {
		$crate::SiteInfo::new(Some(module_path!()), file!(), line!(), column!())
	};
}

/// Subscribes with the current module recorded as the call site.
///
/// ```
/// use observe_track::{subscribe, Observable};
///
/// let count = Observable::with_value(1);
/// let label = Observable::with_value(String::new());
///
/// subscribe!((label) count => move |value: &i32, _| {
///     label.set(format!("count: {value}")).unwrap();
/// })
/// .unwrap();
///
/// assert_eq!(label.get(), "count: 1");
/// ```
#[macro_export]
macro_rules! subscribe {
    (( $($d_tt:tt)* ) $observable:expr => $($b:tt)*) => {
        $observable.subscribe_with(
            $crate::macros::enclose!(($( $d_tt )*) $($b)*),
            $crate::SubscribeOptions::default().at($crate::site!()),
        )
    };
    ($observable:expr => $($b:tt)*) => {
        $observable.subscribe_with($($b)*, $crate::SubscribeOptions::default().at($crate::site!()))
    };
}
