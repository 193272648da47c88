use procdock_core::config::AppDescriptor;
use procdock_core::launcher::{AppProcessManager, AppProcessManagerFactory};

/// Platform-independent factory that selects the appropriate launcher
/// implementation at compile time
pub struct PlatformAppProcessManagerFactory;

impl AppProcessManagerFactory for PlatformAppProcessManagerFactory {
    #[cfg(unix)]
    type Manager = procdock_unix::UnixAppProcessManager;

    #[cfg(windows)]
    type Manager = procdock_windows::WindowsAppProcessManager;

    fn create(descriptor: &AppDescriptor) -> Self::Manager {
        <Self::Manager as AppProcessManager>::new(descriptor)
    }

    fn platform_name() -> &'static str {
        platform_name()
    }
}

/// Get the platform name for logging and debugging
pub fn platform_name() -> &'static str {
    #[cfg(unix)]
    {
        "Unix"
    }

    #[cfg(windows)]
    {
        "Windows"
    }

    #[cfg(not(any(unix, windows)))]
    {
        compile_error!("Unsupported platform: only Unix and Windows are currently supported");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procdock_core::config::AppDescriptor;

    #[test]
    fn test_platform_detection() {
        let platform = PlatformAppProcessManagerFactory::platform_name();
        assert!(!platform.is_empty());

        let descriptor = AppDescriptor::builder()
            .name("probe")
            .script("true")
            .build()
            .unwrap();
        let _manager = PlatformAppProcessManagerFactory::create(&descriptor);
    }
}
