mod binary;
mod delay;
mod failure;
mod rewrite;
mod teardown;
