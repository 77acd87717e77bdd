//! The user-facing API: configure a WireMock container with `builder::WireMockContainerBuilder`,
//! then interact with the running `exposed_container::WireMockContainer`.
//!
//! Both are thin layers over the building blocks exposed at the crate root (`ImageSpec`,
//! `MountPlanner`, `ContainerHandle`, `EndpointResolver`, `ReadinessProbe`), which can be used
//! directly when finer control is needed - e.g. keeping a container alive for inspection after
//! it failed to become ready.
mod builder;
mod exposed_container;

pub use builder::WireMockContainerBuilder;
pub use exposed_container::WireMockContainer;
