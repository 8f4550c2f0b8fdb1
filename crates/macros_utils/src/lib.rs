//! Small declarative helpers shared by the server crates.

#[cfg(feature = "actix")]
#[doc(hidden)]
pub use actix_web;

/// Generate a `routes` function registering services on an actix-web
/// `ServiceConfig`.
///
/// `route name` registers a handler declared with one of the actix-web route
/// attributes, `load module` pulls in the `routes` function of a child module
/// and `data make` registers the value returned by `make()` as app data
/// (extractor configs, for instance).
///
/// ```ignore
/// macros_utils::routes! {
///     load health,
///     route check_now,
///     data query_config,
/// }
/// ```
#[cfg(feature = "actix")]
#[macro_export]
macro_rules! routes {
    ($($kind:ident $name:ident),* $(,)?) => {
        pub fn routes(cfg: &mut $crate::actix_web::web::ServiceConfig) {
            $( $crate::__register!(cfg, $kind $name); )*
        }
    };
}

#[cfg(feature = "actix")]
#[doc(hidden)]
#[macro_export]
macro_rules! __register {
    ($cfg:ident, route $name:ident) => {
        $cfg.service($name);
    };
    ($cfg:ident, load $module:ident) => {
        $cfg.configure($module::routes);
    };
    ($cfg:ident, data $make:ident) => {
        $cfg.app_data($make());
    };
}
