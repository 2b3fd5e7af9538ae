use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::Mutex;

use ash::{
    extensions::khr::{AccelerationStructure, RayTracingPipeline, Synchronization2},
    vk::{self, ApplicationInfo, DeviceCreateInfo, DeviceQueueCreateInfo, InstanceCreateInfo},
};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};

use crate::device::DeviceCapabilities;
use crate::error::{RayTracingError, Result};

/// Vulkan instance and a logical device with the ray tracing extensions enabled.
///
/// No surface is created. Presenting is up to the embedding application.
pub struct Context {
    _entry: ash::Entry,
    pub instance: ash::Instance,

    pub context_raytracing: ContextRaytracing,
    pub synchronisation2_loader: Synchronization2,

    pub physical_device: vk::PhysicalDevice,
    pub queue_family_index: u32,

    pub device: ash::Device,
    pub queue: vk::Queue,

    pub allocator: ManuallyDrop<Mutex<Allocator>>,
}

pub struct ContextRaytracing {
    pub ray_tracing_pipeline: RayTracingPipeline,
    pub physical_device_ray_tracing_pipeline_properties_khr:
        vk::PhysicalDeviceRayTracingPipelinePropertiesKHR,

    pub acceleration_structure: AccelerationStructure,
    pub physical_device_acceleration_structure_properties_khr:
        vk::PhysicalDeviceAccelerationStructurePropertiesKHR,
}

impl Context {
    pub fn new() -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }?;
        let instance = create_instance(&entry)?;

        let (physical_device, queue_family_index) = match find_physical_device(&instance) {
            Ok(Some(found)) => found,
            Ok(None) => {
                unsafe { instance.destroy_instance(None) };
                return Err(RayTracingError::Unsupported);
            }
            Err(error) => {
                unsafe { instance.destroy_instance(None) };
                return Err(error);
            }
        };

        let device = create_logical_device(&instance, physical_device, queue_family_index)?;
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let synchronisation2_loader = Synchronization2::new(&instance, &device);

        let ray_tracing_pipeline = RayTracingPipeline::new(&instance, &device);
        let physical_device_ray_tracing_pipeline_properties_khr =
            unsafe { RayTracingPipeline::get_properties(&instance, physical_device) };

        let acceleration_structure = AccelerationStructure::new(&instance, &device);
        let physical_device_acceleration_structure_properties_khr =
            unsafe { AccelerationStructure::get_properties(&instance, physical_device) };

        let context_raytracing = ContextRaytracing {
            ray_tracing_pipeline,
            physical_device_ray_tracing_pipeline_properties_khr,
            acceleration_structure,
            physical_device_acceleration_structure_properties_khr,
        };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;

        log::info!(
            "Using {} for ray tracing",
            unsafe {
                CStr::from_ptr(
                    instance
                        .get_physical_device_properties(physical_device)
                        .device_name
                        .as_ptr(),
                )
            }
            .to_string_lossy()
        );

        Ok(Self {
            _entry: entry,
            instance,

            context_raytracing,
            synchronisation2_loader,

            physical_device,
            queue_family_index,

            device,
            queue,

            allocator: ManuallyDrop::new(Mutex::new(allocator)),
        })
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        let pipeline_properties = &self
            .context_raytracing
            .physical_device_ray_tracing_pipeline_properties_khr;
        let acceleration_structure_properties = &self
            .context_raytracing
            .physical_device_acceleration_structure_properties_khr;

        DeviceCapabilities {
            standalone_shaders: true,
            max_recursion_depth: pipeline_properties.max_ray_recursion_depth,
            shader_group_handle_size: pipeline_properties.shader_group_handle_size,
            shader_group_handle_alignment: pipeline_properties.shader_group_handle_alignment,
            shader_group_base_alignment: pipeline_properties.shader_group_base_alignment,
            max_instance_count: acceleration_structure_properties.max_instance_count,
        }
    }

    pub fn scratch_alignment(&self) -> u64 {
        self.context_raytracing
            .physical_device_acceleration_structure_properties_khr
            .min_acceleration_structure_scratch_offset_alignment as u64
    }

    pub fn buffer_device_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::builder().buffer(buffer);
        unsafe { self.device.get_buffer_device_address(&info) }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe { ManuallyDrop::drop(&mut self.allocator) };

        unsafe { self.device.destroy_device(None) };

        unsafe { self.instance.destroy_instance(None) };
    }
}

fn create_instance(entry: &ash::Entry) -> Result<ash::Instance> {
    let app_info = ApplicationInfo::builder().api_version(vk::API_VERSION_1_3);
    let create_info = InstanceCreateInfo::builder().application_info(&app_info);
    Ok(unsafe { entry.create_instance(&create_info, None) }?)
}

fn required_device_extensions() -> [&'static CStr; 5] {
    [
        ash::extensions::khr::Synchronization2::name(),
        ash::extensions::khr::AccelerationStructure::name(),
        ash::extensions::khr::RayTracingPipeline::name(),
        ash::extensions::khr::DeferredHostOperations::name(),
        ash::extensions::khr::BufferDeviceAddress::name(),
    ]
}

/// Picks the most capable device that has every ray tracing extension and a compute queue.
fn find_physical_device(instance: &ash::Instance) -> Result<Option<(vk::PhysicalDevice, u32)>> {
    let physical_devices = unsafe { instance.enumerate_physical_devices() }?;

    let mut candidates = Vec::new();
    for pd in physical_devices {
        let extension_properties = unsafe { instance.enumerate_device_extension_properties(pd) }?;
        let supported_extensions: Vec<&CStr> = extension_properties
            .iter()
            .map(|property| unsafe { CStr::from_ptr(property.extension_name.as_ptr()) })
            .collect();
        let has_extensions = required_device_extensions()
            .iter()
            .all(|required| supported_extensions.contains(required));
        if !has_extensions {
            continue;
        }

        let queue_family_index = unsafe { instance.get_physical_device_queue_family_properties(pd) }
            .iter()
            .position(|info| info.queue_flags.contains(vk::QueueFlags::COMPUTE));
        if let Some(index) = queue_family_index {
            candidates.push((pd, index as u32));
        }
    }

    Ok(candidates.into_iter().min_by_key(|(pd, _)| {
        let device_type = unsafe { instance.get_physical_device_properties(*pd) }.device_type;

        match device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 0,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
            vk::PhysicalDeviceType::CPU => 3,
            vk::PhysicalDeviceType::OTHER => 4,
            _ => 5,
        }
    }))
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family_index: u32,
) -> Result<ash::Device> {
    let device_extensions = required_device_extensions().map(CStr::as_ptr);

    let queue_priorities = [1.0];
    let queue_create_info = DeviceQueueCreateInfo::builder()
        .queue_family_index(queue_family_index)
        .queue_priorities(&queue_priorities)
        .build();

    let mut physical_device_vulkan13_features = vk::PhysicalDeviceVulkan13Features {
        synchronization2: vk::TRUE,
        ..vk::PhysicalDeviceVulkan13Features::default()
    };

    let mut enabled_buffer_device_address_features =
        vk::PhysicalDeviceBufferDeviceAddressFeatures {
            buffer_device_address: vk::TRUE,
            ..vk::PhysicalDeviceBufferDeviceAddressFeatures::default()
        };

    let mut enabled_ray_tracing_pipeline_features =
        vk::PhysicalDeviceRayTracingPipelineFeaturesKHR {
            ray_tracing_pipeline: vk::TRUE,
            ..vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default()
        };

    let mut enabled_acceleration_structure_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR {
            acceleration_structure: vk::TRUE,
            ..vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
        };

    let create_info = DeviceCreateInfo::builder()
        .queue_create_infos(std::slice::from_ref(&queue_create_info))
        .enabled_extension_names(&device_extensions)
        .push_next(&mut physical_device_vulkan13_features)
        .push_next(&mut enabled_buffer_device_address_features)
        .push_next(&mut enabled_ray_tracing_pipeline_features)
        .push_next(&mut enabled_acceleration_structure_features);

    Ok(unsafe { instance.create_device(physical_device, &create_info, None) }?)
}
