pub mod camera {
    pub mod domain {
        pub mod frame_source;
    }
    pub mod infrastructure;
}

pub mod capture {
    pub mod capture_runtime;
    pub mod domain {
        pub mod capture_gate;
        pub mod session;
    }
    pub mod session_logger;
    pub mod session_state_machine;
}

pub mod detection {
    pub mod domain {
        pub mod detection_dispatch;
        pub mod detection_engine;
        pub mod detection_result;
    }
    pub mod infrastructure;
}

pub mod persistence {
    pub mod domain {
        pub mod capture_store;
    }
    pub mod infrastructure;
}

pub mod shared {
    pub mod constants;
    pub mod frame;
    pub mod model_resolver;
}
