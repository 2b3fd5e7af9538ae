use std::{ops::Deref, sync::Arc};

use ash::vk::{self};

use super::context::Context;
use crate::error::Result;

#[derive(Clone)]
pub struct CommandPool {
    inner: Arc<CommandPoolImpl>,
}

impl CommandPool {
    pub fn new(context: Arc<Context>) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(context.queue_family_index)
            .flags(
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                    | vk::CommandPoolCreateFlags::TRANSIENT,
            );

        let command_pool = unsafe { context.device.create_command_pool(&create_info, None) }?;

        Ok(Self {
            inner: Arc::new(CommandPoolImpl {
                inner: command_pool,
                context,
            }),
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.inner.context
    }

    pub fn allocate_command_buffer(&self) -> Result<vk::CommandBuffer> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.inner.inner)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffers =
            unsafe { self.context().device.allocate_command_buffers(&allocate_info) }?;
        command_buffers
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY.into())
    }

    /// Records with `record` into a fresh command buffer, submits it and waits for the queue.
    pub fn one_time_submit<T>(
        &self,
        record: impl FnOnce(vk::CommandBuffer) -> Result<T>,
    ) -> Result<T> {
        let device = &self.context().device;
        let command_buffer = self.allocate_command_buffer()?;

        let result = (|| -> Result<T> {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { device.begin_command_buffer(command_buffer, &begin_info) }?;

            let value = record(command_buffer)?;

            unsafe { device.end_command_buffer(command_buffer) }?;

            let submit_info = vk::SubmitInfo::builder()
                .command_buffers(std::slice::from_ref(&command_buffer))
                .build();
            unsafe {
                device.queue_submit(
                    self.context().queue,
                    std::slice::from_ref(&submit_info),
                    vk::Fence::null(),
                )
            }?;
            unsafe { device.queue_wait_idle(self.context().queue) }?;
            Ok(value)
        })();

        unsafe { device.free_command_buffers(self.inner.inner, &[command_buffer]) };
        result
    }
}

struct CommandPoolImpl {
    pub inner: vk::CommandPool,
    pub context: Arc<Context>,
}

impl Drop for CommandPoolImpl {
    fn drop(&mut self) {
        unsafe { self.context.device.destroy_command_pool(self.inner, None) };
    }
}

impl Deref for CommandPool {
    type Target = vk::CommandPool;

    fn deref(&self) -> &Self::Target {
        &self.inner.inner
    }
}
