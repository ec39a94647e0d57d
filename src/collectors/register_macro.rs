macro_rules! register_collectors {
    (
        $(
            $module:ident => $collector_type:ident
        ),* $(,)?
    ) => {
        // Import all collector modules
        $(
            pub mod $module;
            pub use $module::$collector_type;
        )*

        /// Resolve a collector class to a constructor. Class names match
        /// case-insensitively; this is the only place collectors are
        /// identified by string.
        pub fn new_collector(
            class: &str,
            state: CollectorState,
        ) -> Result<Box<dyn Collector>, PollerError> {
            match class.to_ascii_lowercase().as_str() {
                $(
                    stringify!($module) => Ok(Box::new(<$collector_type>::new(state))),
                )*
                other => Err(PollerError::Dload(format!(
                    "collector ({other}) not in registry"
                ))),
            }
        }

        /// Built-in template of a collector class (schedule, objects and
        /// class defaults); an override can be placed in `HOME_PATH/conf/`.
        pub fn builtin_template(class: &str) -> Result<Params, PollerError> {
            match class.to_ascii_lowercase().as_str() {
                $(
                    stringify!($module) => Params::from_yaml(<$collector_type>::TEMPLATE),
                )*
                other => Err(PollerError::Dload(format!(
                    "collector ({other}) not in registry"
                ))),
            }
        }

        // Class names known to the registry
        pub const COLLECTOR_CLASSES: &[&str] = &[
            $(stringify!($module),)*
        ];
    };
}
